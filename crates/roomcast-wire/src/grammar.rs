//! Message grammar for the roomcast wire protocol.
//!
//! A bus message is `sender:payload` - sender name, one colon, then the
//! rest verbatim including any further colons and the trailing newline.
//! The payload decides the routing: a literal roster query, a directed
//! form naming a single recipient, or a broadcast.

/// Payload that asks for the current roster, newline included.
pub const ROSTER_QUERY: &str = "newroommates\n";

/// Prefix of the synthetic roster reply.
pub const ROSTER_PREFIX: &str = "roommates:";

/// Prefix of the synthetic departure notice.
pub const DEPARTURE_PREFIX: &str = "leavingroommate:";

/// Prefix of a two-argument direct message.
pub const DIRECT_PREFIX: &str = "To:";

/// Field that marks the directed form of a tool message.
const TO_FIELD: &str = "To";

/// Tool traffic prefixes that carry their own addressing field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Repeater,
    Intruder,
}

impl ToolKind {
    /// The wire prefix for this tool, colon included.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Repeater => "Repeater:",
            Self::Intruder => "Intruder:",
        }
    }

    /// Strip a tool prefix off a payload, returning the tool and the rest.
    fn strip(payload: &str) -> Option<(Self, &str)> {
        for kind in [Self::Repeater, Self::Intruder] {
            if let Some(rest) = payload.strip_prefix(kind.prefix()) {
                return Some((kind, rest));
            }
        }
        None
    }
}

/// A raw bus message split into sender and payload.
///
/// A message without a colon is treated as sender-only with an empty
/// payload and falls through to a plain broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    raw: &'a str,
    /// Name of the member that produced the message.
    pub sender: &'a str,
    /// Everything after the first colon, verbatim.
    pub payload: &'a str,
}

impl<'a> Envelope<'a> {
    /// Split a raw bus message at the first colon.
    #[must_use]
    pub fn parse(raw: &'a str) -> Self {
        match raw.split_once(':') {
            Some((sender, payload)) => Self {
                raw,
                sender,
                payload,
            },
            None => Self {
                raw,
                sender: raw,
                payload: "",
            },
        }
    }

    /// The original message, untouched.
    #[must_use]
    pub fn raw(&self) -> &'a str {
        self.raw
    }

    /// Classify the payload into a routing directive. First match wins.
    #[must_use]
    pub fn directive(&self) -> Directive<'a> {
        if self.payload == ROSTER_QUERY {
            return Directive::RosterQuery;
        }

        if let Some((kind, rest)) = ToolKind::strip(self.payload) {
            let (first, tail) = match rest.split_once(':') {
                Some((first, tail)) => (first, Some(tail)),
                None => (rest, None),
            };
            if first != TO_FIELD {
                // Tool fan-out keeps the payload verbatim, prefix and all.
                return Directive::Broadcast {
                    line: self.payload.to_string(),
                };
            }
            return match tail {
                None | Some("") => Directive::Malformed {
                    reason: "directed tool message without a target",
                },
                Some(tail) => match tail.split_once(':') {
                    Some(("", _)) => Directive::Malformed {
                        reason: "directed tool message with an empty target",
                    },
                    Some((target, body)) => Directive::Directed {
                        target,
                        line: format!("{}{}", kind.prefix(), body),
                    },
                    // Target with no body: the target still receives the
                    // bare prefix.
                    None => Directive::Directed {
                        target: tail,
                        line: kind.prefix().to_string(),
                    },
                },
            };
        }

        if let Some(rest) = self.payload.strip_prefix(DIRECT_PREFIX) {
            return match rest.split_once(':') {
                Some(("", _)) => Directive::Malformed {
                    reason: "direct message with an empty target",
                },
                Some((target, body)) => Directive::Directed {
                    target,
                    line: body.to_string(),
                },
                None if rest.is_empty() => Directive::Malformed {
                    reason: "direct message without a target",
                },
                None => Directive::Directed {
                    target: rest,
                    line: String::new(),
                },
            };
        }

        Directive::Broadcast {
            line: self.raw.to_string(),
        }
    }
}

/// What the dispatcher should do with one bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive<'a> {
    /// Send the roster snapshot to every member, sender included.
    RosterQuery,
    /// Deliver `line` to `target` only, unless the target muted the sender.
    Directed { target: &'a str, line: String },
    /// Deliver `line` to every member except the sender, skipping members
    /// who muted the sender.
    Broadcast { line: String },
    /// A directed form missing its target; dropped after logging.
    Malformed { reason: &'static str },
}

/// Build the `roommates:<names>\n` roster reply.
#[must_use]
pub fn roster_line<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = names
        .into_iter()
        .map(|n| n.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("{ROSTER_PREFIX}{joined}\n")
}

/// Build the `leavingroommate:<name>\n` departure notice.
#[must_use]
pub fn departure_line(name: &str) -> String {
    format!("{DEPARTURE_PREFIX}{name}\n")
}
