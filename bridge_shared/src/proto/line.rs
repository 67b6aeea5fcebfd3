//! Line parsing for the management channel.

use crate::status::ConnectionStatus;

/// Kind of a `>NEED-OK` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeedKind {
    /// Engine asks for the virtual device to be opened
    OpenTun,
    /// Engine pushes the local address and netmask
    Ifconfig,
    /// Engine pushes a route
    Route,
    /// Engine pushes a DNS server
    Dns,
    /// Any other need type, acknowledged generically
    Other(String),
}

impl NeedKind {
    fn from_token(token: &str) -> Self {
        match token {
            "OPENTUN" => NeedKind::OpenTun,
            "IFCONFIG" => NeedKind::Ifconfig,
            "ROUTE" => NeedKind::Route,
            "DNS" => NeedKind::Dns,
            other => NeedKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NeedKind::OpenTun => "OPENTUN",
            NeedKind::Ifconfig => "IFCONFIG",
            NeedKind::Route => "ROUTE",
            NeedKind::Dns => "DNS",
            NeedKind::Other(s) => s,
        }
    }
}

/// One parsed management-protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `>PASSWORD:` prompt; credentials are not required for this flow
    PasswordPrompt,
    /// `>NEED-OK <kind> <args...>`
    NeedOk { kind: NeedKind, args: Vec<String> },
    /// `>STATE:` change; `None` when the last field matches no known phase
    State(Option<ConnectionStatus>),
    /// `>BYTECOUNT <in>,<out>`; non-numeric fields fall back to 0
    ByteCount { bytes_in: u64, bytes_out: u64 },
    /// `>INFO` / `SUCCESS` / `HOLD`, log-only
    Informational,
    /// Anything else, ignored without error
    Ignored,
}

/// Classify one line (no trailing newline) from the management connection.
///
/// Tokenization is whitespace-split for the `NEED-OK` family and
/// comma-split for `STATE` / `BYTECOUNT`. A directive with fewer tokens
/// than required is treated as malformed and classified as `Ignored`; the
/// channel must never stall on a partially-formed line.
pub fn parse_line(line: &str) -> Directive {
    if line.starts_with(">PASSWORD:") {
        return Directive::PasswordPrompt;
    }
    if line.starts_with(">NEED-OK") {
        let mut tokens = line.split_whitespace();
        let _tag = tokens.next();
        let Some(kind_token) = tokens.next() else {
            return Directive::Ignored;
        };
        return Directive::NeedOk {
            kind: NeedKind::from_token(kind_token),
            args: tokens.map(str::to_string).collect(),
        };
    }
    if line.starts_with(">STATE:") {
        let last = line.split(',').next_back().map(str::trim).unwrap_or("");
        // DISCONNECTED and CONNECTING both contain CONNECTED as a
        // substring, so the match order matters.
        let phase = if last.contains("DISCONNECTED") {
            Some(ConnectionStatus::Disconnected)
        } else if last.contains("CONNECTING") {
            Some(ConnectionStatus::Connecting)
        } else if last.contains("CONNECTED") {
            Some(ConnectionStatus::Connected)
        } else {
            None
        };
        return Directive::State(phase);
    }
    if line.starts_with(">BYTECOUNT") {
        let mut fields = line.split(',');
        let first = fields.next().unwrap_or("");
        let Some(second) = fields.next() else {
            return Directive::Ignored;
        };
        let bytes_in = first
            .trim_start_matches(">BYTECOUNT")
            .trim_start_matches(':')
            .trim()
            .parse()
            .unwrap_or(0);
        let bytes_out = second.trim().parse().unwrap_or(0);
        return Directive::ByteCount {
            bytes_in,
            bytes_out,
        };
    }
    if line.starts_with(">INFO") || line.starts_with("SUCCESS") || line.starts_with("HOLD") {
        return Directive::Informational;
    }
    Directive::Ignored
}

/// Reply text written back to the engine, without the trailing newline.
pub mod reply {
    use super::NeedKind;

    pub fn password() -> String {
        "password All \"dummy\"".to_string()
    }

    pub fn needok_ok(kind: &NeedKind) -> String {
        format!("needok '{}' ok", kind.as_str())
    }

    pub fn needok_cancel(kind: &NeedKind) -> String {
        format!("needok '{}' cancel", kind.as_str())
    }

    pub fn tun_fd(fd: i32) -> String {
        format!("tun-fd {fd}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_prompt_is_classified() {
        assert_eq!(
            parse_line(">PASSWORD:Need 'Auth' username/password"),
            Directive::PasswordPrompt
        );
    }

    #[test]
    fn need_ok_tokenizes_kind_and_args() {
        let parsed = parse_line(">NEED-OK IFCONFIG 10.8.0.2 255.255.255.0");
        assert_eq!(
            parsed,
            Directive::NeedOk {
                kind: NeedKind::Ifconfig,
                args: vec!["10.8.0.2".into(), "255.255.255.0".into()],
            }
        );
    }

    #[test]
    fn need_ok_without_kind_is_ignored() {
        assert_eq!(parse_line(">NEED-OK"), Directive::Ignored);
    }

    #[test]
    fn need_ok_unknown_kind_is_preserved() {
        let parsed = parse_line(">NEED-OK PERSIST-TUN-ACTION");
        assert_eq!(
            parsed,
            Directive::NeedOk {
                kind: NeedKind::Other("PERSIST-TUN-ACTION".into()),
                args: vec![],
            }
        );
    }

    #[test]
    fn state_connected_is_detected_from_last_field() {
        assert_eq!(
            parse_line(">STATE:1653,CONNECTED"),
            Directive::State(Some(ConnectionStatus::Connected))
        );
    }

    #[test]
    fn state_disconnected_is_not_misread_as_connected() {
        assert_eq!(
            parse_line(">STATE:1653,DISCONNECTED"),
            Directive::State(Some(ConnectionStatus::Disconnected))
        );
    }

    #[test]
    fn state_reconnecting_maps_to_connecting() {
        assert_eq!(
            parse_line(">STATE:1653,RECONNECTING"),
            Directive::State(Some(ConnectionStatus::Connecting))
        );
    }

    #[test]
    fn state_unrecognized_phase_is_none() {
        assert_eq!(parse_line(">STATE:1653,WAIT"), Directive::State(None));
    }

    #[test]
    fn bytecount_parses_both_counters() {
        assert_eq!(
            parse_line(">BYTECOUNT 2048,4096"),
            Directive::ByteCount {
                bytes_in: 2048,
                bytes_out: 4096,
            }
        );
    }

    #[test]
    fn bytecount_with_colon_separator_parses() {
        assert_eq!(
            parse_line(">BYTECOUNT:2048,4096"),
            Directive::ByteCount {
                bytes_in: 2048,
                bytes_out: 4096,
            }
        );
    }

    #[test]
    fn bytecount_non_numeric_falls_back_to_zero() {
        assert_eq!(
            parse_line(">BYTECOUNT abc,4096"),
            Directive::ByteCount {
                bytes_in: 0,
                bytes_out: 4096,
            }
        );
    }

    #[test]
    fn bytecount_with_single_field_is_ignored() {
        assert_eq!(parse_line(">BYTECOUNT 2048"), Directive::Ignored);
    }

    #[test]
    fn info_success_hold_are_informational() {
        assert_eq!(parse_line(">INFO:OpenVPN Management"), Directive::Informational);
        assert_eq!(parse_line("SUCCESS: hold release"), Directive::Informational);
        assert_eq!(parse_line("HOLD:Waiting for hold release"), Directive::Informational);
    }

    #[test]
    fn unknown_lines_are_ignored() {
        assert_eq!(parse_line(">LOG:1653,I,init complete"), Directive::Ignored);
        assert_eq!(parse_line(""), Directive::Ignored);
    }

    #[test]
    fn replies_match_the_wire_format() {
        assert_eq!(reply::password(), "password All \"dummy\"");
        assert_eq!(reply::needok_ok(&NeedKind::Route), "needok 'ROUTE' ok");
        assert_eq!(
            reply::needok_cancel(&NeedKind::OpenTun),
            "needok 'OPENTUN' cancel"
        );
        assert_eq!(reply::tun_fd(7), "tun-fd 7");
    }
}
