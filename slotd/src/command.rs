//! §4's wire grammar: `VERB arg...\n`. Parsing is pure and independent of
//! the live tables so it can be unit-tested without a socket or a running
//! [`crate::host::Host`]; resolving a parsed command against the live slot
//! table, and actually invoking a plug-in, happens in `host.rs`.

use crate::error::ProtocolError;
use crate::ids::SlotIndex;

/// How a command named the slot it targets: either the bare table index
/// the original protocol always used, or a plug-in name, matched by
/// prefix against loaded slots in index order (§9 Open Question — see
/// DESIGN.md; the original only ever supported the numeric form).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRef {
    Index(usize),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    /// `LIST` with no operand (§4.4): one line per occupied slot plus one
    /// line per resource and its capability tags.
    List,
    /// `LIST <slot_or_name>` (§4.4): that slot's long help text instead.
    ListHelp { slot: SlotRef },
    Get { slot: SlotRef, resource: String },
    Set { slot: SlotRef, resource: String, value: String },
    Cat { slot: SlotRef, resource: String },
    LoadSo { name: String },
}

/// Splits an already-prefix-stripped, newline-stripped command line into
/// whitespace-separated tokens. A quoted `SET` value (`SET 0 text "hello
/// world"`) keeps its interior spaces; no other verb takes a multi-word
/// final argument.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut buf = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                buf.push(c);
            }
            tokens.push(buf);
            continue;
        }
        let mut buf = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            buf.push(c);
            chars.next();
        }
        tokens.push(buf);
    }
    tokens
}

fn parse_slot_ref(token: &str) -> SlotRef {
    match token.parse::<usize>() {
        Ok(index) => SlotRef::Index(index),
        Err(_) => SlotRef::Name(token.to_string()),
    }
}

/// Strips `prefix` from the start of `verb`, case-sensitively (verbs are
/// always upper-case on the wire). Returns `None` if `verb` doesn't carry
/// the configured prefix at all — the caller reports that as an
/// unrecognized verb, the same as a misspelled one.
fn strip_prefix<'a>(prefix: &str, verb: &'a str) -> Option<&'a str> {
    verb.strip_prefix(prefix)
}

/// Parses one already newline-stripped input line. `prefix` is the
/// dispatcher's configured verb namespace (empty string for the
/// unprefixed default); see `SPEC_FULL.md` §2.
pub fn parse_line(prefix: &str, line: &str) -> Result<ParsedCommand, ProtocolError> {
    let tokens = tokenize(line);
    let Some(raw_verb) = tokens.first() else {
        return Err(ProtocolError::UnrecognizedVerb(String::new()));
    };
    let Some(verb) = strip_prefix(prefix, raw_verb) else {
        return Err(ProtocolError::UnrecognizedVerb(raw_verb.clone()));
    };
    let args = &tokens[1..];

    match verb {
        "LIST" => match args {
            [] => Ok(ParsedCommand::List),
            [slot] => Ok(ParsedCommand::ListHelp {
                slot: parse_slot_ref(slot),
            }),
            _ => Err(ProtocolError::InvalidValue(
                "LIST takes at most one operand".into(),
            )),
        },
        "GET" => {
            let [slot, resource] = args else {
                return Err(ProtocolError::InvalidValue(
                    "GET requires <slot> <resource>".into(),
                ));
            };
            Ok(ParsedCommand::Get {
                slot: parse_slot_ref(slot),
                resource: resource.clone(),
            })
        }
        "SET" => {
            if args.len() < 3 {
                return Err(ProtocolError::InvalidValue(
                    "SET requires <slot> <resource> <value>".into(),
                ));
            }
            Ok(ParsedCommand::Set {
                slot: parse_slot_ref(&args[0]),
                resource: args[1].clone(),
                value: args[2..].join(" "),
            })
        }
        "CAT" => {
            let [slot, resource] = args else {
                return Err(ProtocolError::InvalidValue(
                    "CAT requires <slot> <resource>".into(),
                ));
            };
            Ok(ParsedCommand::Cat {
                slot: parse_slot_ref(slot),
                resource: resource.clone(),
            })
        }
        "LOADSO" => {
            let [name] = args else {
                return Err(ProtocolError::InvalidValue(
                    "LOADSO requires <plugin-name>".into(),
                ));
            };
            Ok(ParsedCommand::LoadSo { name: name.clone() })
        }
        other => Err(ProtocolError::UnrecognizedVerb(other.to_string())),
    }
}

/// Resolves a [`SlotRef`] against a slot table, implementing §9's
/// first-match-by-prefix rule for the name form.
pub fn resolve_slot(
    slots: &crate::slot::SlotTable,
    slot_ref: &SlotRef,
) -> Result<SlotIndex, ProtocolError> {
    match slot_ref {
        SlotRef::Index(i) => {
            if *i < slots.capacity() && slots.get(SlotIndex(*i)).is_some() {
                Ok(SlotIndex(*i))
            } else {
                Err(ProtocolError::BadSlotIndex(i.to_string()))
            }
        }
        SlotRef::Name(name) => slots
            .matching_prefix(name)
            .next()
            .ok_or_else(|| ProtocolError::UnknownPlugin(name.clone())),
    }
}

/// Resolves a resource name to its index within a loaded slot's resource
/// list; resource names are matched exactly, unlike slot names (§9).
pub fn resolve_resource(
    loaded: &crate::slot::LoadedSlot,
    name: &str,
) -> Result<usize, ProtocolError> {
    loaded
        .resources
        .iter()
        .position(|r| r.name == name)
        .ok_or_else(|| ProtocolError::NoSuchResource(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_with_no_args() {
        assert_eq!(parse_line("", "LIST"), Ok(ParsedCommand::List));
    }

    #[test]
    fn parses_list_with_one_operand_as_help_request() {
        assert_eq!(
            parse_line("", "LIST hellodemo").unwrap(),
            ParsedCommand::ListHelp {
                slot: SlotRef::Name("hellodemo".into())
            }
        );
        assert_eq!(
            parse_line("", "LIST 2").unwrap(),
            ParsedCommand::ListHelp {
                slot: SlotRef::Index(2)
            }
        );
    }

    #[test]
    fn rejects_list_with_more_than_one_operand() {
        assert!(parse_line("", "LIST 0 1").is_err());
    }

    #[test]
    fn parses_get_by_numeric_slot() {
        let parsed = parse_line("", "GET 2 temperature").unwrap();
        assert_eq!(
            parsed,
            ParsedCommand::Get {
                slot: SlotRef::Index(2),
                resource: "temperature".into()
            }
        );
    }

    #[test]
    fn parses_get_by_name_slot() {
        let parsed = parse_line("", "GET hellodemo text").unwrap();
        assert_eq!(
            parsed,
            ParsedCommand::Get {
                slot: SlotRef::Name("hellodemo".into()),
                resource: "text".into()
            }
        );
    }

    #[test]
    fn parses_set_with_multiword_quoted_value() {
        let parsed = parse_line("", r#"SET 0 message "hello there""#).unwrap();
        assert_eq!(
            parsed,
            ParsedCommand::Set {
                slot: SlotRef::Index(0),
                resource: "message".into(),
                value: "hello there".into(),
            }
        );
    }

    #[test]
    fn respects_configured_prefix() {
        let parsed = parse_line("SLOT.", "SLOT.LIST").unwrap();
        assert_eq!(parsed, ParsedCommand::List);
        assert!(parse_line("SLOT.", "LIST").is_err());
    }

    #[test]
    fn rejects_unknown_verb() {
        let err = parse_line("", "FROB 1 2").unwrap_err();
        assert!(matches!(err, ProtocolError::UnrecognizedVerb(v) if v == "FROB"));
    }

    #[test]
    fn rejects_get_with_missing_args() {
        assert!(parse_line("", "GET 1").is_err());
    }
}
