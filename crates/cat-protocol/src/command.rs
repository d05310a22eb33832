//! Outbound command templates
//!
//! Commands are configured as printf-style templates with positional `%s`
//! placeholders (`%%` is a literal percent sign). A template is parsed once
//! and then formatted on every enqueue, with the parameter count checked
//! against the number of placeholders before anything is substituted.

use std::collections::HashMap;

use crate::definition::CommandDefinition;
use crate::error::ProtocolError;

/// A fully formatted command ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutboundCommand {
    /// Name of the command definition it was built from
    pub name: String,
    /// Text written to the transport
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder,
}

/// A parsed command template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    name: String,
    segments: Vec<Segment>,
    arity: usize,
}

impl CommandTemplate {
    /// Parse a command definition's template
    pub fn parse(def: &CommandDefinition) -> Result<Self, ProtocolError> {
        let invalid = |reason: String| ProtocolError::InvalidTemplate {
            command: def.name.clone(),
            reason,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut arity = 0;
        let mut chars = def.template.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => literal.push('%'),
                Some('s') => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder);
                    arity += 1;
                }
                Some(other) => return Err(invalid(format!("unsupported verb %{other}"))),
                None => return Err(invalid("dangling % at end of template".into())),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            name: def.name.clone(),
            segments,
            arity,
        })
    }

    /// Command name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of `%s` placeholders
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Substitute parameters into the template
    pub fn format<S: AsRef<str>>(&self, params: &[S]) -> Result<OutboundCommand, ProtocolError> {
        if params.len() != self.arity {
            return Err(ProtocolError::ArityMismatch {
                command: self.name.clone(),
                expected: self.arity,
                provided: params.len(),
            });
        }

        let mut text = String::new();
        let mut params = params.iter();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => text.push_str(s),
                Segment::Placeholder => {
                    if let Some(p) = params.next() {
                        text.push_str(p.as_ref());
                    }
                }
            }
        }

        Ok(OutboundCommand {
            name: self.name.clone(),
            text,
        })
    }
}

/// Name-indexed set of parsed command templates
#[derive(Debug, Clone, Default)]
pub struct CommandSet {
    commands: HashMap<String, CommandTemplate>,
}

impl CommandSet {
    /// Parse every definition; the first definition of a name wins
    pub fn build(definitions: &[CommandDefinition]) -> Result<Self, ProtocolError> {
        let mut commands = HashMap::with_capacity(definitions.len());
        for def in definitions {
            let template = CommandTemplate::parse(def)?;
            commands.entry(def.name.clone()).or_insert(template);
        }
        Ok(Self { commands })
    }

    /// Look up a template by exact name
    pub fn get(&self, name: &str) -> Option<&CommandTemplate> {
        self.commands.get(name)
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Look up and format a command in one step
    pub fn format<S: AsRef<str>>(
        &self,
        name: &str,
        params: &[S],
    ) -> Result<OutboundCommand, ProtocolError> {
        self.get(name)
            .ok_or_else(|| ProtocolError::CommandNotFound(name.to_string()))?
            .format(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(t: &str) -> CommandTemplate {
        CommandTemplate::parse(&CommandDefinition::new("INIT", t)).unwrap()
    }

    #[test]
    fn test_format_two_params() {
        let t = template("CMD %s %s");
        assert_eq!(t.arity(), 2);
        let cmd = t.format(&["one", "two"]).unwrap();
        assert_eq!(cmd.text, "CMD one two");
        assert_eq!(cmd.name, "INIT");
    }

    #[test]
    fn test_arity_mismatch() {
        let t = template("CMD %s %s");
        assert_eq!(
            t.format(&["only-one"]).unwrap_err(),
            ProtocolError::ArityMismatch {
                command: "INIT".into(),
                expected: 2,
                provided: 1
            }
        );
        assert!(matches!(
            t.format(&["one", "two", "three"]),
            Err(ProtocolError::ArityMismatch { provided: 3, .. })
        ));
    }

    #[test]
    fn test_no_placeholders() {
        let t = template("FA;");
        assert_eq!(t.arity(), 0);
        let empty: [&str; 0] = [];
        assert_eq!(t.format(&empty).unwrap().text, "FA;");
    }

    #[test]
    fn test_escaped_percent() {
        let t = template("PC%%%s;");
        assert_eq!(t.arity(), 1);
        assert_eq!(t.format(&["050"]).unwrap().text, "PC%050;");
    }

    #[test]
    fn test_adjacent_placeholders() {
        let t = template("%s%s;");
        assert_eq!(t.format(&["FA", "00014250000"]).unwrap().text, "FA00014250000;");
    }

    #[test]
    fn test_rejects_unsupported_verb() {
        let err = CommandTemplate::parse(&CommandDefinition::new("X", "FA%d;")).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_rejects_dangling_percent() {
        let err = CommandTemplate::parse(&CommandDefinition::new("X", "FA%")).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_command_set_lookup() {
        let set = CommandSet::build(&[
            CommandDefinition::new("READ", "FA;"),
            CommandDefinition::new("SET_FREQ", "FA%s;"),
            CommandDefinition::new("READ", "IF;"),
        ])
        .unwrap();

        assert_eq!(set.len(), 2);
        let empty: [&str; 0] = [];
        assert_eq!(set.format("READ", &empty).unwrap().text, "FA;");
        assert_eq!(
            set.format("SET_FREQ", &["00007074000"]).unwrap().text,
            "FA00007074000;"
        );
        assert_eq!(
            set.format("NOPE", &empty).unwrap_err(),
            ProtocolError::CommandNotFound("NOPE".into())
        );
    }

    #[test]
    fn test_params_are_not_reinterpreted() {
        let t = template("MSG %s;");
        assert_eq!(t.format(&["100%s"]).unwrap().text, "MSG 100%s;");
    }
}
