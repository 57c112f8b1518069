//! Colon commands typed at the prompt. They are handled before any model call.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `:e <command>`: run a shell command directly.
    Exec(String),
    /// `:m`: toggle multiline input.
    ToggleMultiline,
    Clear,
    Image(String),
    Drop,
    /// `:compress [n]`: summarize all but the last `n` messages.
    Compress(Option<usize>),
    Models,
    ListModels,
    SetAgentModel(String),
    SetCodeModel(String),
    SetLightModel(String),
    Help,
    /// A known command given without its required argument.
    Usage(&'static str),
}

impl Command {
    /// Recognizes a command. Anything else, including unknown `:` words, is
    /// `None` and goes to the model as ordinary input.
    pub fn parse(input: &str) -> Option<Command> {
        let input = input.trim();
        if !input.starts_with(':') {
            return None;
        }
        let (word, rest) = match input.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (input, ""),
        };

        let with_arg = |make: fn(String) -> Command, usage: &'static str| {
            if rest.is_empty() {
                Command::Usage(usage)
            } else {
                make(rest.to_string())
            }
        };

        let command = match word {
            ":e" => with_arg(Command::Exec, ":e <shell command>"),
            ":m" => Command::ToggleMultiline,
            ":clear" => Command::Clear,
            ":image" => with_arg(Command::Image, ":image <path>"),
            ":drop" => Command::Drop,
            ":compress" if rest.is_empty() => Command::Compress(None),
            ":compress" => match rest.parse::<usize>() {
                Ok(keep) if keep > 0 => Command::Compress(Some(keep)),
                _ => Command::Usage(":compress [number of recent messages to keep]"),
            },
            ":models" => Command::Models,
            ":list-models" => Command::ListModels,
            ":set-agent-model" => with_arg(Command::SetAgentModel, ":set-agent-model <provider/model>"),
            ":set-code-model" => with_arg(Command::SetCodeModel, ":set-code-model <provider/model>"),
            ":set-light-model" => with_arg(Command::SetLightModel, ":set-light-model <provider/model>"),
            ":help" => Command::Help,
            _ => return None,
        };
        Some(command)
    }
}

pub const HELP: &str = "\
Commands:
  :e <command>               run a shell command and add its output to the conversation
  :m                         toggle multiline input (finish with a line containing :end)
  :clear                     start over, keeping only the system prompt
  :image <path>              attach an image to your next message
  :drop                      remove the last attached image
  :compress [n]              summarize older history with the light model, keeping the last n messages
  :models                    show the configured models
  :list-models               show the configured providers and their models
  :set-agent-model <id>      switch the model that drives the conversation
  :set-code-model <id>       switch the code model
  :set-light-model <id>      switch the light model
  :help                      show this help";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse(":e ls -la  src"),
            Some(Command::Exec("ls -la  src".to_string()))
        );
        assert_eq!(Command::parse("  :clear "), Some(Command::Clear));
        assert_eq!(Command::parse(":m"), Some(Command::ToggleMultiline));
        assert_eq!(
            Command::parse(":image shots/a.png"),
            Some(Command::Image("shots/a.png".to_string()))
        );
        assert_eq!(Command::parse(":compress"), Some(Command::Compress(None)));
        assert_eq!(Command::parse(":compress 4"), Some(Command::Compress(Some(4))));
        assert_eq!(Command::parse(":list-models"), Some(Command::ListModels));
        assert_eq!(
            Command::parse(":set-agent-model ollama/llama3"),
            Some(Command::SetAgentModel("ollama/llama3".to_string()))
        );
    }

    #[test]
    fn test_missing_argument_gives_usage() {
        assert_eq!(
            Command::parse(":e"),
            Some(Command::Usage(":e <shell command>"))
        );
        assert!(matches!(
            Command::parse(":set-code-model   "),
            Some(Command::Usage(_))
        ));
        assert!(matches!(
            Command::parse(":compress lots"),
            Some(Command::Usage(_))
        ));
        assert!(matches!(Command::parse(":compress 0"), Some(Command::Usage(_))));
    }

    #[test]
    fn test_plain_input_and_unknown_words_are_not_commands() {
        assert_eq!(Command::parse("fix the bug"), None);
        assert_eq!(Command::parse(":) thanks"), None);
        assert_eq!(Command::parse(":exec ls"), None);
        assert_eq!(Command::parse("use :e to run"), None);
    }
}
