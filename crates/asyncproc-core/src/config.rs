use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Launch configuration for a managed child process.
///
/// Standard output and standard error are always captured and no shell is
/// involved; those are not configurable.
#[derive(Default, Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into, strip_option))]
#[serde(rename_all = "camelCase")]
pub struct StartInfo {
    pub program: PathBuf,
    /// Command line passed to the program as one string, see [`split_arguments`]
    #[builder(default)]
    #[serde(default)]
    pub arguments: Option<String>,
    /// Inherited from the caller when unset
    #[builder(default)]
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Overrides merged over the inherited environment
    #[builder(default)]
    #[builder(setter(custom))]
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl StartInfo {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn builder() -> StartInfoBuilder {
        StartInfoBuilder::default()
    }

    /// The argument vector derived from [`StartInfo::arguments`]
    pub fn argv(&self) -> Vec<String> {
        self.arguments
            .as_deref()
            .map(split_arguments)
            .unwrap_or_default()
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl StartInfoBuilder {
    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());

        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

/// Where and how to look for an executable
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
#[serde(rename_all = "camelCase")]
pub struct ExecutableSearch {
    pub name: String,
    /// Searched recursively after the current directory and `PATH`
    #[builder(default)]
    #[builder(setter(custom))]
    #[serde(default)]
    pub base_paths: Vec<PathBuf>,
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub include_current_dir: bool,
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub include_path: bool,
    /// Descend into subdirectories of the current directory and base paths
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub recursive: bool,
}

impl ExecutableSearch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_paths: Vec::new(),
            include_current_dir: default_true(),
            include_path: default_true(),
            recursive: default_true(),
        }
    }

    pub fn builder() -> ExecutableSearchBuilder {
        ExecutableSearchBuilder::default()
    }
}

impl ExecutableSearchBuilder {
    pub fn base_paths<P: Into<PathBuf>, I: IntoIterator<Item = P>>(&mut self, iter: I) -> &mut Self {
        let paths = self.base_paths.get_or_insert_with(Vec::new);
        paths.extend(iter.into_iter().map(Into::into));
        self
    }
}

fn default_true() -> bool {
    true
}

/// Split a command-line string into arguments.
///
/// Whitespace separates arguments. Double and single quotes group text,
/// including whitespace, and may produce empty arguments. Outside single
/// quotes `\"` yields a literal quote and `\\` a literal backslash; any other
/// backslash is kept as is.
pub fn split_arguments(command_line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;
    let mut chars = command_line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, quote) {
            ('\\', q) if q != Some('\'') => match chars.peek() {
                Some(&next @ ('"' | '\\')) => {
                    current.push(next);
                    chars.next();
                    in_arg = true;
                }
                _ => {
                    current.push('\\');
                    in_arg = true;
                }
            },
            ('"' | '\'', None) => {
                quote = Some(c);
                in_arg = true;
            }
            (c, Some(q)) if c == q => quote = None,
            (c, None) if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            (c, _) => {
                current.push(c);
                in_arg = true;
            }
        }
    }

    if in_arg {
        args.push(current);
    }
    args
}
