//! Translation of search parameters into a ripgrep command line

use crate::error::{Result, SearchError};
use crate::search::types::{OutputFormat, SearchParameters};
use globset::Glob;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

/// Default executable name, resolved through `PATH`
pub const DEFAULT_EXECUTABLE: &str = "rg";

/// A fully-built invocation of the search tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCommand {
    program: OsString,
    args: Vec<OsString>,
    format: OutputFormat,
}

impl SearchCommand {
    /// Wrap an arbitrary program whose output is in `format`
    pub fn new(
        program: impl Into<OsString>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
        format: OutputFormat,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            format,
        }
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Shell-like rendering for logs and error messages
    pub fn display(&self) -> String {
        let mut out = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            out.push(' ');
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                out.push('\'');
                out.push_str(&arg.replace('\'', "'\\''"));
                out.push('\'');
            } else {
                out.push_str(&arg);
            }
        }
        out
    }

    /// Process builder with piped stdout/stderr and no stdin
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

/// Builds search commands for a configured executable
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    executable: OsString,
    format: OutputFormat,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_EXECUTABLE, OutputFormat::Json)
    }
}

impl CommandBuilder {
    pub fn new(executable: impl Into<OsString>, format: OutputFormat) -> Self {
        Self {
            executable: executable.into(),
            format,
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Validate `params` and build a command in the default output format
    pub fn build(&self, params: &SearchParameters) -> Result<SearchCommand> {
        self.build_with_format(params, self.format)
    }

    /// Validate `params` and build a command producing `format`
    pub fn build_with_format(
        &self,
        params: &SearchParameters,
        format: OutputFormat,
    ) -> Result<SearchCommand> {
        validate(params)?;

        let mut args: Vec<OsString> = vec!["--no-config".into()];

        match format {
            OutputFormat::Json => args.push("--json".into()),
            OutputFormat::Plain => {
                for flag in [
                    "--no-heading",
                    "--with-filename",
                    "--line-number",
                    "--column",
                    "--color=always",
                ] {
                    args.push(flag.into());
                }
            }
        }

        args.push(if params.case_sensitive {
            "--case-sensitive".into()
        } else {
            "--ignore-case".into()
        });
        if params.whole_word {
            args.push("--word-regexp".into());
        }
        if !params.regex {
            args.push("--fixed-strings".into());
        }
        if params.context_lines > 0 {
            args.push(format!("--context={}", params.context_lines).into());
        }
        for file_type in &params.file_types {
            args.push(format!("--type={}", file_type).into());
        }
        for glob in &params.exclude_globs {
            args.push(format!("--glob=!{}", glob).into());
        }
        if let Some(depth) = params.max_depth {
            args.push(format!("--max-depth={}", depth).into());
        }
        if params.follow_symlinks {
            args.push("--follow".into());
        }
        if params.include_hidden {
            args.push("--hidden".into());
        }

        // Everything after `--` is positional, so patterns starting with `-` are safe
        args.push("--".into());
        args.push(params.pattern.clone().into());
        args.push(params.root.clone().into_os_string());

        Ok(SearchCommand {
            program: self.executable.clone(),
            args,
            format,
        })
    }
}

fn validate(params: &SearchParameters) -> Result<()> {
    if params.pattern.is_empty() {
        return Err(SearchError::InvalidPattern(
            "pattern must not be empty".to_string(),
        ));
    }
    if params.regex {
        regex::Regex::new(&params.pattern)
            .map_err(|e| SearchError::InvalidPattern(e.to_string()))?;
    }

    if params.max_results == 0 {
        return Err(SearchError::InvalidParameter {
            name: "max_results",
            reason: "must be at least 1".to_string(),
        });
    }

    for file_type in &params.file_types {
        if file_type.is_empty() || file_type.starts_with('-') {
            return Err(SearchError::InvalidParameter {
                name: "file_types",
                reason: format!("invalid file type `{}`", file_type),
            });
        }
    }
    for glob in &params.exclude_globs {
        Glob::new(glob).map_err(|e| SearchError::InvalidParameter {
            name: "exclude_globs",
            reason: e.to_string(),
        })?;
    }

    check_readable(&params.root)
}

fn check_readable(root: &Path) -> Result<()> {
    let meta = fs::metadata(root).map_err(|e| SearchError::invalid_path(root, e.to_string()))?;

    let readable = if meta.is_dir() {
        fs::read_dir(root).map(drop)
    } else {
        fs::File::open(root).map(drop)
    };
    readable.map_err(|e| SearchError::invalid_path(root, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args_of(cmd: &SearchCommand) -> Vec<String> {
        cmd.args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let dir = TempDir::new().unwrap();
        let params = SearchParameters::new("", dir.path());
        let err = CommandBuilder::default().build(&params).unwrap_err();
        assert!(matches!(err, SearchError::InvalidPattern(_)));
    }

    #[test]
    fn test_bad_regex_rejected_but_fixed_string_allowed() {
        let dir = TempDir::new().unwrap();
        let builder = CommandBuilder::default();

        let params = SearchParameters::new("foo(", dir.path());
        assert!(matches!(
            builder.build(&params),
            Err(SearchError::InvalidPattern(_))
        ));

        let params = SearchParameters::new("foo(", dir.path()).fixed_string();
        assert!(builder.build(&params).is_ok());
    }

    #[test]
    fn test_missing_root_rejected() {
        let dir = TempDir::new().unwrap();
        let params = SearchParameters::new("x", dir.path().join("does-not-exist"));
        let err = CommandBuilder::default().build(&params).unwrap_err();
        assert!(matches!(err, SearchError::InvalidPath { .. }));
    }

    #[test]
    fn test_zero_max_results_rejected() {
        let dir = TempDir::new().unwrap();
        let params = SearchParameters::new("x", dir.path()).with_max_results(0);
        let err = CommandBuilder::default().build(&params).unwrap_err();
        assert!(matches!(
            err,
            SearchError::InvalidParameter {
                name: "max_results",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let dir = TempDir::new().unwrap();
        let params = SearchParameters::new("x", dir.path()).with_exclude("a[");
        assert!(CommandBuilder::default().build(&params).is_err());
    }

    #[test]
    fn test_json_command_flags() {
        let dir = TempDir::new().unwrap();
        let params = SearchParameters::new("TODO", dir.path())
            .case_insensitive()
            .whole_word()
            .fixed_string()
            .with_context(2)
            .with_file_type("rust")
            .with_file_type("py")
            .with_exclude("target/**")
            .with_max_depth(4);

        let cmd = CommandBuilder::default().build(&params).unwrap();
        let args = args_of(&cmd);

        assert_eq!(cmd.program(), "rg");
        assert_eq!(cmd.format(), OutputFormat::Json);
        let mut expected: Vec<String> = [
            "--no-config",
            "--json",
            "--ignore-case",
            "--word-regexp",
            "--fixed-strings",
            "--context=2",
            "--type=py",
            "--type=rust",
            "--glob=!target/**",
            "--max-depth=4",
            "--",
            "TODO",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        expected.push(dir.path().to_string_lossy().into_owned());
        assert_eq!(args, expected);
    }

    #[test]
    fn test_plain_command_requests_colors_and_columns() {
        let dir = TempDir::new().unwrap();
        let params = SearchParameters::new("fn", dir.path());
        let cmd = CommandBuilder::default()
            .build_with_format(&params, OutputFormat::Plain)
            .unwrap();
        let args = args_of(&cmd);

        assert!(args.contains(&"--column".to_string()));
        assert!(args.contains(&"--color=always".to_string()));
        assert!(args.contains(&"--case-sensitive".to_string()));
        assert!(!args.contains(&"--json".to_string()));
    }

    #[test]
    fn test_build_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let params = SearchParameters::new("a|b", dir.path())
            .with_exclude("z/**")
            .with_exclude("a/**")
            .with_file_type("go");
        let builder = CommandBuilder::new("/opt/rg", OutputFormat::Json);

        let first = builder.build(&params).unwrap();
        for _ in 0..10 {
            let again = builder.build(&params.clone()).unwrap();
            assert_eq!(first, again);
            assert_eq!(first.display(), again.display());
        }
    }

    #[test]
    fn test_pattern_starting_with_dash_is_positional() {
        let dir = TempDir::new().unwrap();
        let params = SearchParameters::new("-v", dir.path()).fixed_string();
        let cmd = CommandBuilder::default().build(&params).unwrap();
        let args = args_of(&cmd);
        let sep = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(args[sep + 1], "-v");
    }

    #[test]
    fn test_display_quotes_whitespace() {
        let cmd = SearchCommand::new("rg", ["--json", "two words"], OutputFormat::Json);
        assert_eq!(cmd.display(), "rg --json 'two words'");
    }
}
