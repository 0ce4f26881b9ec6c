//! Registry data for the built-in library.
//!
//! The ids, names, doc strings, and the method dispatch table live here so
//! the compiler can resolve builtin names without depending on the runtime
//! crate; the implementations live in `yq-runtime`.

use crate::value::ValueKind;
use serde::{Deserialize, Serialize};

/// Identifier of a built-in procedure.
///
/// A builtin is invoked through the ordinary call protocol, via a
/// distinguished closure whose entry redirects into host code, or via a
/// bound procedure produced by method resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    // Conversions
    Number,
    Integer,
    Float,
    String,
    Boolean,
    Object,
    Ord,
    Chr,
    // Math
    Abs,
    Pow,
    Sqrt,
    // Sequence operations
    Length,
    Contains,
    Find,
    FindAll,
    Split,
    Join,
    Random,
    Enumerated,
    Sum,
    Filter,
    Reduce,
    Map,
    Max,
    Min,
    Reversed,
    Sorted,
    // Range builders
    Range,
    RangeInclusive,
    // Regular expressions
    Re,
    Match,
    MatchAll,
    MatchEntire,
    Replace,
    RegexSplit,
    // System
    Time,
    Sleep,
    GetNickname,
}

/// Builtins reachable as global functions, in registration order.
pub const GLOBAL_BUILTINS: &[Builtin] = &[
    Builtin::Number,
    Builtin::Integer,
    Builtin::Float,
    Builtin::String,
    Builtin::Boolean,
    Builtin::Object,
    Builtin::Ord,
    Builtin::Chr,
    Builtin::Abs,
    Builtin::Pow,
    Builtin::Sqrt,
    Builtin::Length,
    Builtin::Contains,
    Builtin::Find,
    Builtin::FindAll,
    Builtin::Split,
    Builtin::Join,
    Builtin::Random,
    Builtin::Enumerated,
    Builtin::Sum,
    Builtin::Filter,
    Builtin::Reduce,
    Builtin::Map,
    Builtin::Max,
    Builtin::Min,
    Builtin::Reversed,
    Builtin::Sorted,
    Builtin::Range,
    Builtin::RangeInclusive,
    Builtin::Re,
    Builtin::Time,
    Builtin::Sleep,
    Builtin::GetNickname,
];

impl Builtin {
    /// The source-level name of the builtin.
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Number => "number",
            Builtin::Integer => "integer",
            Builtin::Float => "float",
            Builtin::String => "string",
            Builtin::Boolean => "boolean",
            Builtin::Object => "object",
            Builtin::Ord => "ord",
            Builtin::Chr => "chr",
            Builtin::Abs => "abs",
            Builtin::Pow => "pow",
            Builtin::Sqrt => "sqrt",
            Builtin::Length => "length",
            Builtin::Contains => "contains",
            Builtin::Find => "find",
            Builtin::FindAll => "findAll",
            Builtin::Split => "split",
            Builtin::Join => "join",
            Builtin::Random => "random",
            Builtin::Enumerated => "enumerated",
            Builtin::Sum => "sum",
            Builtin::Filter => "filter",
            Builtin::Reduce => "reduce",
            Builtin::Map => "map",
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::Reversed => "reversed",
            Builtin::Sorted => "sorted",
            Builtin::Range => "range",
            Builtin::RangeInclusive => "rangeInclusive",
            Builtin::Re => "re",
            Builtin::Match => "match",
            Builtin::MatchAll => "matchAll",
            Builtin::MatchEntire => "matchEntire",
            Builtin::Replace => "replace",
            Builtin::RegexSplit => "split",
            Builtin::Time => "time",
            Builtin::Sleep => "sleep",
            Builtin::GetNickname => "getNickname",
        }
    }

    /// Resolve a global function name. Method-only builtins (the regex
    /// family) are not reachable this way.
    pub fn from_global_name(name: &str) -> Option<Builtin> {
        GLOBAL_BUILTINS.iter().copied().find(|b| b.name() == name)
    }

    /// Resolve a method name against a receiver kind.
    pub fn method(kind: ValueKind, name: &str) -> Option<Builtin> {
        let found = match kind {
            ValueKind::String => match name {
                "length" => Builtin::Length,
                "contains" => Builtin::Contains,
                "find" => Builtin::Find,
                "findAll" => Builtin::FindAll,
                "split" => Builtin::Split,
                "random" => Builtin::Random,
                "reversed" => Builtin::Reversed,
                _ => return None,
            },
            ValueKind::List => match name {
                "length" => Builtin::Length,
                "contains" => Builtin::Contains,
                "find" => Builtin::Find,
                "findAll" => Builtin::FindAll,
                "join" => Builtin::Join,
                "random" => Builtin::Random,
                "enumerated" => Builtin::Enumerated,
                "sum" => Builtin::Sum,
                "filter" => Builtin::Filter,
                "reduce" => Builtin::Reduce,
                "map" => Builtin::Map,
                "max" => Builtin::Max,
                "min" => Builtin::Min,
                "reversed" => Builtin::Reversed,
                "sorted" => Builtin::Sorted,
                _ => return None,
            },
            ValueKind::Object => match name {
                "length" => Builtin::Length,
                "contains" => Builtin::Contains,
                _ => return None,
            },
            ValueKind::Range => match name {
                "length" => Builtin::Length,
                "contains" => Builtin::Contains,
                "random" => Builtin::Random,
                "sum" => Builtin::Sum,
                "enumerated" => Builtin::Enumerated,
                "filter" => Builtin::Filter,
                "reduce" => Builtin::Reduce,
                "map" => Builtin::Map,
                "reversed" => Builtin::Reversed,
                _ => return None,
            },
            ValueKind::Regex => match name {
                "match" => Builtin::Match,
                "matchAll" => Builtin::MatchAll,
                "matchEntire" => Builtin::MatchEntire,
                "replace" => Builtin::Replace,
                "split" => Builtin::RegexSplit,
                _ => return None,
            },
            _ => return None,
        };
        Some(found)
    }

    /// One-line documentation, surfaced by the host's help command.
    pub fn doc(self) -> &'static str {
        match self {
            Builtin::Number => "number(x): parse a string (or coerce a value) to an integer or float",
            Builtin::Integer => "integer(x): convert a value to an integer, truncating floats",
            Builtin::Float => "float(x): convert a value to a float",
            Builtin::String => "string(x): format a value in its printable form",
            Builtin::Boolean => "boolean(x): the truthiness of a value",
            Builtin::Object => "object(pairs?): an empty object, or one built from a list of [key, value] pairs",
            Builtin::Ord => "ord(s): the code point of a one-character string",
            Builtin::Chr => "chr(n): the one-character string for a code point",
            Builtin::Abs => "abs(x): absolute value",
            Builtin::Pow => "pow(base, exp): exponentiation; integer when both are integers and exp >= 0",
            Builtin::Sqrt => "sqrt(x): square root as a float",
            Builtin::Length => "length(seq): element count of a string, list, object, or range",
            Builtin::Contains => "contains(seq, x): membership test (substring, element, key, or range member)",
            Builtin::Find => "find(seq, x): first index of x, or -1",
            Builtin::FindAll => "findAll(seq, x): every index of x",
            Builtin::Split => "split(s, sep?): split by a string, a regex, or whitespace when omitted",
            Builtin::Join => "join(list, sep): concatenate printable forms with a separator",
            Builtin::Random => "random(seq): a random element of a string, list, or range",
            Builtin::Enumerated => "enumerated(list): the list of [index, value] pairs",
            Builtin::Sum => "sum(seq): sum of a numeric list or range",
            Builtin::Filter => "filter(seq, f): elements for which f returns a truthy value",
            Builtin::Reduce => "reduce(seq, init, f): fold the sequence with f(accumulator, element)",
            Builtin::Map => "map(seq, f): transform each element with f",
            Builtin::Max => "max(list): largest element",
            Builtin::Min => "min(list): smallest element",
            Builtin::Reversed => "reversed(seq): a reversed copy of a list or string",
            Builtin::Sorted => "sorted(list, cmp?): ascending sort; cmp returns truthy when its first argument sorts after its second",
            Builtin::Range => "range(begin, end): a half-open range of integers or single characters",
            Builtin::RangeInclusive => "rangeInclusive(begin, end): an inclusive range of integers or single characters",
            Builtin::Re => "re(pattern, flags?): a regex value; flags from \"ims\"",
            Builtin::Match => "regex.match(s): first match in s, or null",
            Builtin::MatchAll => "regex.matchAll(s): every match in s",
            Builtin::MatchEntire => "regex.matchEntire(s): the match if the regex covers all of s, else null",
            Builtin::Replace => "regex.replace(s, repl): s with every match replaced",
            Builtin::RegexSplit => "regex.split(s): s split around matches",
            Builtin::Time => "time(): milliseconds since the epoch",
            Builtin::Sleep => "sleep(ms): cooperative wait; the host credits slept time to the deadline",
            Builtin::GetNickname => "getNickname(id): the display name for a user id",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_lookup_round_trips() {
        for b in GLOBAL_BUILTINS {
            assert_eq!(Builtin::from_global_name(b.name()), Some(*b));
        }
    }

    #[test]
    fn test_regex_methods_not_global() {
        assert_eq!(Builtin::from_global_name("match"), None);
        assert_eq!(Builtin::from_global_name("matchAll"), None);
    }

    #[test]
    fn test_method_table_respects_kind() {
        assert_eq!(
            Builtin::method(ValueKind::String, "length"),
            Some(Builtin::Length)
        );
        assert_eq!(
            Builtin::method(ValueKind::Regex, "split"),
            Some(Builtin::RegexSplit)
        );
        assert_eq!(Builtin::method(ValueKind::Integer, "length"), None);
        assert_eq!(Builtin::method(ValueKind::List, "match"), None);
    }

    #[test]
    fn test_every_builtin_is_documented() {
        for b in GLOBAL_BUILTINS {
            assert!(!b.doc().is_empty());
        }
    }
}
