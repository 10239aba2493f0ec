// FT8/FT4 free-text message parsing
//
// Patterns are tried in a fixed order and the first match wins:
//   1. CQ calls, optionally directed ("CQ DX", "CQ POTA", "CQ EU") with grid
//   2. exchanges using the <...> hashed/compound callsign notation
//   3. plain "TO FROM INFO" exchanges carrying a report, grid or RRR/RR73/73
// A looser pattern must never shadow a more specific one.

use serde::Serialize;

/// Placeholder WSJT-X prints for a hashed callsign it has not seen in full
pub const UNRESOLVED_CALL: &str = "<...>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Cq,      // CQ call
    Grid,    // Sending grid
    Report,  // Sending signal report
    End,     // RR73/RRR/73
    Other,
}

/// Fields extracted from one decoded message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedMessage {
    pub msg_type: MessageType,
    /// Who the message is addressed to: the called station, or the CQ modifier
    pub directed: Option<String>,
    /// The station sending the message
    pub callsign: String,
    pub grid: Option<String>,
    /// Signal report or terminator
    pub report: Option<String>,
}

impl ParsedMessage {
    pub fn is_cq(&self) -> bool {
        self.msg_type == MessageType::Cq
    }

    pub fn is_terminator(&self) -> bool {
        self.msg_type == MessageType::End
    }
}

/// Parse a decoded message. Returns `None` when no pattern matches.
///
/// Examples:
/// - "CQ W5ABC EM10", "CQ DX F4ABC JN12"
/// - "<PJ4/K1ABC> F4ABC JN12", "F4ABC <PJ4/K1ABC> -05", "<...> F4ABC JN12"
/// - "W5ABC KJ5KCZ -05", "KJ5KCZ W5ABC R-10", "W5ABC KJ5KCZ RR73"
pub fn parse_ft8_message(message: &str) -> Option<ParsedMessage> {
    let upper = message.trim().to_uppercase();
    let parts: Vec<&str> = upper.split_whitespace().collect();
    if parts.is_empty() {
        return None;
    }

    parse_cq(&parts)
        .or_else(|| parse_bracketed(&parts))
        .or_else(|| parse_directed(&parts))
}

fn parse_cq(parts: &[&str]) -> Option<ParsedMessage> {
    if parts[0] != "CQ" || parts.len() < 2 {
        return None;
    }

    // "CQ DX F4ABC JN12": a non-callsign token before the callsign is the modifier
    let (directed, call_idx) = if parts.len() >= 3
        && !is_valid_callsign(strip_brackets(parts[1]))
        && is_valid_callsign(strip_brackets(parts[2]))
    {
        (Some(parts[1].to_string()), 2)
    } else {
        (None, 1)
    };

    let callsign = strip_brackets(parts[call_idx]);
    if !is_valid_callsign(callsign) {
        return None;
    }
    let grid = parts
        .get(call_idx + 1)
        .filter(|g| is_valid_grid(g))
        .map(|g| g.to_string());

    Some(ParsedMessage {
        msg_type: MessageType::Cq,
        directed,
        callsign: callsign.to_string(),
        grid,
        report: None,
    })
}

fn parse_bracketed(parts: &[&str]) -> Option<ParsedMessage> {
    if parts.len() < 2 || !(is_bracketed(parts[0]) || is_bracketed(parts[1])) {
        return None;
    }
    let info = parts.get(2).copied();

    // "<...>" is a hashed call WSJT-X could not resolve
    if parts[0] == UNRESOLVED_CALL {
        let callsign = strip_brackets(parts[1]);
        if !is_valid_callsign(callsign) {
            return None;
        }
        return exchange(None, callsign, info);
    }
    if parts[1] == UNRESOLVED_CALL {
        let directed = strip_brackets(parts[0]);
        if !is_valid_callsign(directed) {
            return None;
        }
        return exchange(Some(directed), UNRESOLVED_CALL, info);
    }

    let directed = strip_brackets(parts[0]);
    let callsign = strip_brackets(parts[1]);
    if !is_valid_callsign(directed) || !is_valid_callsign(callsign) {
        return None;
    }
    exchange(Some(directed), callsign, info)
}

fn parse_directed(parts: &[&str]) -> Option<ParsedMessage> {
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    if !is_valid_callsign(parts[0]) || !is_valid_callsign(parts[1]) {
        return None;
    }
    exchange(Some(parts[0]), parts[1], parts.get(2).copied())
}

fn exchange(directed: Option<&str>, callsign: &str, info: Option<&str>) -> Option<ParsedMessage> {
    let (msg_type, grid, report) = match info {
        None => (MessageType::Other, None, None),
        Some(third) if is_terminator(third) => (MessageType::End, None, Some(third.to_string())),
        Some(third) if is_report(third) => (MessageType::Report, None, Some(third.to_string())),
        Some(third) if is_valid_grid(third) => (MessageType::Grid, Some(third.to_string()), None),
        Some(_) => return None,
    };
    Some(ParsedMessage {
        msg_type,
        directed: directed.map(str::to_string),
        callsign: callsign.to_string(),
        grid,
        report,
    })
}

fn is_bracketed(s: &str) -> bool {
    s.len() > 2 && s.starts_with('<') && s.ends_with('>')
}

fn strip_brackets(s: &str) -> &str {
    if is_bracketed(s) {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn is_terminator(s: &str) -> bool {
    matches!(s, "RRR" | "RR73" | "73")
}

/// "-05", "+12", "R-10", "R+03"
fn is_report(s: &str) -> bool {
    let body = s.strip_prefix('R').unwrap_or(s);
    let bytes = body.as_bytes();
    bytes.len() == 3
        && (bytes[0] == b'-' || bytes[0] == b'+')
        && bytes[1..].iter().all(|b| b.is_ascii_digit())
}

/// Four character Maidenhead square. RR73 is always a sign-off in FT8.
pub fn is_valid_grid(s: &str) -> bool {
    if s.len() != 4 || s == "RR73" {
        return false;
    }
    let b = s.as_bytes();
    (b'A'..=b'R').contains(&b[0].to_ascii_uppercase())
        && (b'A'..=b'R').contains(&b[1].to_ascii_uppercase())
        && b[2].is_ascii_digit()
        && b[3].is_ascii_digit()
}

/// Basic validation that a string looks like a callsign
/// Callsigns typically have letters and numbers, 3-10 chars (compound calls up to 13)
pub fn is_valid_callsign(s: &str) -> bool {
    let len = s.len();
    if !(3..=13).contains(&len) {
        return false;
    }

    let has_digit = s.chars().any(|c| c.is_ascii_digit());
    let has_letter = s.chars().any(|c| c.is_ascii_alphabetic());
    let all_valid = s.chars().all(|c| c.is_ascii_alphanumeric() || c == '/');

    has_digit && has_letter && all_valid
}
