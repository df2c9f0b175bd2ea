//! Schema-driven parsing of the argument vector sent by the peer.
//!
//! The server receives an already-decoded argument vector and interprets it
//! against a declared option schema. Each option may carry a continuation
//! handler that mutates shared builder state; handlers fire in the order the
//! options appear in the input, so a later option observably overrides an
//! earlier one. Anything outside the schema is a hard error: the peer is
//! rsync itself, not a person, and surprises mean protocol violations.

/// Whether an option carries a value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValuePolicy {
    /// The option is a bare flag.
    None,
    /// The option requires a string value (`--k=v`, `--k v`, `-kv`, `-k v`).
    RequiredString,
}

/// Whether an option must appear in the input.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PresencePolicy {
    /// The option must be present at least once.
    Required,
    /// The option may be absent.
    Optional,
}

/// Errors produced while parsing the peer's argument vector.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ArgParseError {
    /// The input contained an option outside the schema.
    #[error("unknown option {0:?}")]
    UnknownOption(String),
    /// An option that requires a value appeared without one.
    #[error("option {0} requires a value")]
    MissingValue(String),
    /// A bare flag was given an inline value.
    #[error("option {0} does not take a value")]
    UnexpectedValue(String),
    /// A required option never appeared in the input.
    #[error("required option {0} was not supplied")]
    MissingRequired(String),
    /// A continuation handler rejected the option's value.
    #[error("{0}")]
    Invalid(String),
}

/// Continuation handler run when its option is parsed.
///
/// Receives the shared builder state and the option value (always `Some` for
/// [`ValuePolicy::RequiredString`], `None` for flags).
pub type Handler<C> = Box<dyn FnMut(&mut C, Option<&str>) -> Result<(), ArgParseError>>;

/// One option descriptor: names, policies, and an optional handler.
pub struct OptionSpec<C> {
    long: &'static str,
    short: Option<char>,
    value: ValuePolicy,
    presence: PresencePolicy,
    handler: Option<Handler<C>>,
}

impl<C> OptionSpec<C> {
    /// Declares a flag with no handler (a pure sentinel).
    #[must_use]
    pub fn flag(presence: PresencePolicy, long: &'static str, short: Option<char>) -> Self {
        Self {
            long,
            short,
            value: ValuePolicy::None,
            presence,
            handler: None,
        }
    }

    /// Declares a flag whose handler runs each time the flag appears.
    #[must_use]
    pub fn flag_with(
        presence: PresencePolicy,
        long: &'static str,
        short: Option<char>,
        handler: impl FnMut(&mut C, Option<&str>) -> Result<(), ArgParseError> + 'static,
    ) -> Self {
        Self {
            long,
            short,
            value: ValuePolicy::None,
            presence,
            handler: Some(Box::new(handler)),
        }
    }

    /// Declares a string-valued option whose handler receives the value.
    #[must_use]
    pub fn string_with(
        presence: PresencePolicy,
        long: &'static str,
        short: Option<char>,
        handler: impl FnMut(&mut C, Option<&str>) -> Result<(), ArgParseError> + 'static,
    ) -> Self {
        Self {
            long,
            short,
            value: ValuePolicy::RequiredString,
            presence,
            handler: Some(Box::new(handler)),
        }
    }

    /// Renders the option's user-facing name for diagnostics.
    fn display_name(&self) -> String {
        if !self.long.is_empty() {
            format!("--{}", self.long)
        } else if let Some(short) = self.short {
            format!("-{short}")
        } else {
            String::from("<unnamed option>")
        }
    }
}

/// Declarative parser over an option schema, generic over the builder state
/// its handlers mutate.
pub struct ArgumentParser<C> {
    options: Vec<OptionSpec<C>>,
}

impl<C> Default for ArgumentParser<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ArgumentParser<C> {
    /// Creates a parser with an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: Vec::new(),
        }
    }

    /// Adds an option descriptor to the schema.
    pub fn add(&mut self, spec: OptionSpec<C>) -> &mut Self {
        self.options.push(spec);
        self
    }

    /// Parses the argument vector, running handlers in input order.
    ///
    /// Returns the non-option tokens in their original order. A bare `--`
    /// ends option recognition; a lone `-` is an ordinary operand.
    pub fn parse(&mut self, state: &mut C, args: &[String]) -> Result<Vec<String>, ArgParseError> {
        let mut unnamed = Vec::new();
        let mut seen = vec![false; self.options.len()];
        let mut options_done = false;
        let mut index = 0;

        while index < args.len() {
            let token = &args[index];
            index += 1;

            if options_done || token == "-" || !token.starts_with('-') {
                unnamed.push(token.clone());
                continue;
            }

            if token == "--" {
                options_done = true;
                continue;
            }

            if let Some(body) = token.strip_prefix("--") {
                index = self.parse_long(state, &mut seen, args, index, body)?;
            } else {
                index = self.parse_short_cluster(state, &mut seen, args, index, &token[1..])?;
            }
        }

        for (spec, seen) in self.options.iter().zip(&seen) {
            if spec.presence == PresencePolicy::Required && !seen {
                return Err(ArgParseError::MissingRequired(spec.display_name()));
            }
        }

        Ok(unnamed)
    }

    fn parse_long(
        &mut self,
        state: &mut C,
        seen: &mut [bool],
        args: &[String],
        mut index: usize,
        body: &str,
    ) -> Result<usize, ArgParseError> {
        let (name, inline) = match body.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (body, None),
        };

        let position = self
            .options
            .iter()
            .position(|spec| !spec.long.is_empty() && spec.long == name)
            .ok_or_else(|| ArgParseError::UnknownOption(format!("--{name}")))?;
        seen[position] = true;
        let spec = &mut self.options[position];

        let value = match spec.value {
            ValuePolicy::None => {
                if inline.is_some() {
                    return Err(ArgParseError::UnexpectedValue(spec.display_name()));
                }
                None
            }
            ValuePolicy::RequiredString => Some(match inline {
                Some(value) => value.to_owned(),
                None => {
                    let value = args
                        .get(index)
                        .ok_or_else(|| ArgParseError::MissingValue(spec.display_name()))?;
                    index += 1;
                    value.clone()
                }
            }),
        };

        if let Some(handler) = spec.handler.as_mut() {
            handler(state, value.as_deref())?;
        }
        Ok(index)
    }

    fn parse_short_cluster(
        &mut self,
        state: &mut C,
        seen: &mut [bool],
        args: &[String],
        mut index: usize,
        cluster: &str,
    ) -> Result<usize, ArgParseError> {
        let mut letters = cluster.char_indices();
        while let Some((position_in_cluster, letter)) = letters.next() {
            let position = self
                .options
                .iter()
                .position(|spec| spec.short == Some(letter))
                .ok_or_else(|| ArgParseError::UnknownOption(format!("-{letter}")))?;
            seen[position] = true;
            let spec = &mut self.options[position];

            match spec.value {
                ValuePolicy::None => {
                    if let Some(handler) = spec.handler.as_mut() {
                        handler(state, None)?;
                    }
                }
                ValuePolicy::RequiredString => {
                    // The rest of the cluster is the value; if there is no
                    // rest, the next token is.
                    let rest = &cluster[position_in_cluster + letter.len_utf8()..];
                    let value = if rest.is_empty() {
                        let value = args
                            .get(index)
                            .ok_or_else(|| ArgParseError::MissingValue(spec.display_name()))?;
                        index += 1;
                        value.clone()
                    } else {
                        rest.to_owned()
                    };

                    if let Some(handler) = spec.handler.as_mut() {
                        handler(state, Some(&value))?;
                    }
                    return Ok(index);
                }
            }
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct State {
        flags: Vec<&'static str>,
        value: Option<String>,
        verbosity: u32,
    }

    fn args(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|token| (*token).to_owned()).collect()
    }

    fn parser() -> ArgumentParser<State> {
        let mut parser = ArgumentParser::new();
        parser.add(OptionSpec::flag(
            PresencePolicy::Required,
            "server",
            None,
        ));
        parser.add(OptionSpec::flag_with(
            PresencePolicy::Optional,
            "recursive",
            Some('r'),
            |state: &mut State, _| {
                state.flags.push("recursive");
                Ok(())
            },
        ));
        parser.add(OptionSpec::flag_with(
            PresencePolicy::Optional,
            "no-r",
            None,
            |state: &mut State, _| {
                state.flags.push("no-r");
                Ok(())
            },
        ));
        parser.add(OptionSpec::flag_with(
            PresencePolicy::Optional,
            "verbose",
            Some('v'),
            |state: &mut State, _| {
                state.verbosity += 1;
                Ok(())
            },
        ));
        parser.add(OptionSpec::string_with(
            PresencePolicy::Optional,
            "rsh",
            Some('e'),
            |state: &mut State, value| {
                state.value = value.map(str::to_owned);
                Ok(())
            },
        ));
        parser
    }

    #[test]
    fn collects_unnamed_tokens_in_input_order() {
        let mut state = State::default();
        let unnamed = parser()
            .parse(&mut state, &args(&["--server", ".", "src/a", "src/b"]))
            .expect("valid input");
        assert_eq!(unnamed, ["." , "src/a", "src/b"]);
    }

    #[test]
    fn handlers_fire_in_input_order() {
        let mut state = State::default();
        parser()
            .parse(&mut state, &args(&["--server", "-r", "--no-r"]))
            .expect("valid input");
        assert_eq!(state.flags, ["recursive", "no-r"]);

        let mut state = State::default();
        parser()
            .parse(&mut state, &args(&["--server", "--no-r", "-r"]))
            .expect("valid input");
        assert_eq!(state.flags, ["no-r", "recursive"]);
    }

    #[test]
    fn short_clusters_expand_to_individual_flags() {
        let mut state = State::default();
        parser()
            .parse(&mut state, &args(&["--server", "-vvr"]))
            .expect("valid input");
        assert_eq!(state.verbosity, 2);
        assert_eq!(state.flags, ["recursive"]);
    }

    #[test]
    fn string_values_parse_in_all_four_spellings() {
        for tokens in [
            &["--server", "--rsh=.if"][..],
            &["--server", "--rsh", ".if"],
            &["--server", "-e.if"],
            &["--server", "-e", ".if"],
        ] {
            let mut state = State::default();
            parser().parse(&mut state, &args(tokens)).expect("valid input");
            assert_eq!(state.value.as_deref(), Some(".if"), "tokens: {tokens:?}");
        }
    }

    #[test]
    fn short_value_option_consumes_the_rest_of_its_cluster() {
        let mut state = State::default();
        parser()
            .parse(&mut state, &args(&["--server", "-ve.if"]))
            .expect("valid input");
        assert_eq!(state.verbosity, 1);
        assert_eq!(state.value.as_deref(), Some(".if"));
    }

    #[test]
    fn unknown_options_are_rejected() {
        let mut state = State::default();
        let err = parser()
            .parse(&mut state, &args(&["--server", "--bogus"]))
            .unwrap_err();
        assert_eq!(err, ArgParseError::UnknownOption("--bogus".into()));

        let err = parser()
            .parse(&mut state, &args(&["--server", "-x"]))
            .unwrap_err();
        assert_eq!(err, ArgParseError::UnknownOption("-x".into()));
    }

    #[test]
    fn missing_required_options_are_rejected() {
        let mut state = State::default();
        let err = parser().parse(&mut state, &args(&["."])).unwrap_err();
        assert_eq!(err, ArgParseError::MissingRequired("--server".into()));
    }

    #[test]
    fn value_options_require_their_value() {
        let mut state = State::default();
        let err = parser()
            .parse(&mut state, &args(&["--server", "--rsh"]))
            .unwrap_err();
        assert_eq!(err, ArgParseError::MissingValue("--rsh".into()));
    }

    #[test]
    fn flags_reject_inline_values() {
        let mut state = State::default();
        let err = parser()
            .parse(&mut state, &args(&["--server=yes"]))
            .unwrap_err();
        assert_eq!(err, ArgParseError::UnexpectedValue("--server".into()));
    }

    #[test]
    fn double_dash_ends_option_recognition() {
        let mut state = State::default();
        let unnamed = parser()
            .parse(&mut state, &args(&["--server", "--", "--rsh", "-r"]))
            .expect("valid input");
        assert_eq!(unnamed, ["--rsh", "-r"]);
        assert!(state.flags.is_empty());
    }

    #[test]
    fn lone_dash_is_an_operand() {
        let mut state = State::default();
        let unnamed = parser()
            .parse(&mut state, &args(&["--server", "-"]))
            .expect("valid input");
        assert_eq!(unnamed, ["-"]);
    }

    #[test]
    fn handler_failures_surface_as_parse_errors() {
        let mut parser: ArgumentParser<State> = ArgumentParser::new();
        parser.add(OptionSpec::string_with(
            PresencePolicy::Optional,
            "rsh",
            Some('e'),
            |_, value| {
                Err(ArgParseError::Invalid(format!(
                    "bad capability token {:?}",
                    value.unwrap_or_default()
                )))
            },
        ));

        let mut state = State::default();
        let err = parser
            .parse(&mut state, &args(&["--rsh", "bogus"]))
            .unwrap_err();
        assert_eq!(
            err,
            ArgParseError::Invalid("bad capability token \"bogus\"".into())
        );
    }
}
