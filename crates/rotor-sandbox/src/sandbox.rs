//! The command sandbox: validates and executes model-requested tool calls.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError, ToolError};
use crate::filesystem::{FileOp, Workspace};
use crate::policy::CommandPolicy;
use crate::search::WebSearcher;
use crate::shell::ShellRunner;
use crate::tools::{ToolKind, ToolOutcome, ToolTable};
use crate::web::WebFetcher;

/// Upper bound on a model-requested command timeout.
const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Executes the closed set of tools in [`ToolKind`].
///
/// Every entry point returns a [`ToolOutcome`]; rejections and failures are
/// reported in the outcome and never abort the caller.  The sandbox is
/// `Send + Sync` and can serve concurrent calls from one shared reference.
pub struct CommandSandbox {
    config: SandboxConfig,
    table: ToolTable,
    policy: CommandPolicy,
    shell: ShellRunner,
    workspace: Workspace,
    fetcher: WebFetcher,
    searcher: WebSearcher,
}

impl CommandSandbox {
    /// Build a sandbox, reading the Brave key from `BRAVE_API_KEY`.
    pub fn new(config: SandboxConfig) -> std::result::Result<Self, SandboxError> {
        let brave_api_key = std::env::var("BRAVE_API_KEY").ok();
        Self::with_brave_api_key(config, brave_api_key)
    }

    pub fn with_brave_api_key(
        config: SandboxConfig,
        brave_api_key: Option<String>,
    ) -> std::result::Result<Self, SandboxError> {
        let table = ToolTable::standard()?;
        let policy = CommandPolicy::new(&config.allowed_pipe_targets)?;
        let workspace = Workspace::new(
            &config.workspace_root,
            &config.extra_sensitive_paths,
            config.max_file_read_chars,
        )?;
        let shell = ShellRunner::new(workspace.root(), config.max_output_bytes);
        let fetcher = WebFetcher::new(config.fetch_timeout())?;
        let searcher = WebSearcher::new(
            config.fetch_timeout(),
            config.max_search_results,
            brave_api_key,
        )?;

        info!(
            workspace = %workspace.root().display(),
            command_timeout_secs = config.command_timeout_secs,
            "command sandbox ready"
        );

        Ok(Self {
            config,
            table,
            policy,
            shell,
            workspace,
            fetcher,
            searcher,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The canonical workspace root.
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace.root().to_path_buf()
    }

    pub fn tool_table(&self) -> &ToolTable {
        &self.table
    }

    /// Tool schema in the function-calling format providers expect.
    pub fn tool_schema(&self) -> Vec<Value> {
        self.table.schema()
    }

    // -- Individual tools ---------------------------------------------------

    /// Validate `command` and, when it passes, run it with `timeout` (or the
    /// configured default).
    pub async fn run_terminal_command(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> ToolOutcome {
        let result = async {
            self.policy.check(command)?;
            let timeout = timeout
                .unwrap_or_else(|| self.config.command_timeout())
                .min(MAX_COMMAND_TIMEOUT);
            self.shell.run(command, timeout).await
        }
        .await;
        self.finish(ToolKind::RunTerminalCommand, result)
    }

    pub async fn file_operation(
        &self,
        operation: FileOp,
        path: &str,
        content: Option<&str>,
    ) -> ToolOutcome {
        let result = self.workspace.apply(operation, path, content).await;
        self.finish(ToolKind::FileOperation, result)
    }

    pub async fn browse_website(
        &self,
        url: &str,
        selector: Option<&str>,
        max_content_length: Option<usize>,
    ) -> ToolOutcome {
        let max_length = max_content_length
            .filter(|n| *n > 0)
            .unwrap_or(self.config.max_content_length);
        let result = self.fetcher.browse(url, selector, max_length).await;
        self.finish(ToolKind::BrowseWebsite, result)
    }

    pub async fn web_search(
        &self,
        query: &str,
        num_results: Option<usize>,
        engine: Option<&str>,
    ) -> ToolOutcome {
        let result = self.searcher.search(query, num_results, engine).await;
        self.finish(ToolKind::WebSearch, result)
    }

    // -- Dispatch -----------------------------------------------------------

    /// Execute the tool named `name` with JSON `arguments`.
    pub async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> ToolOutcome {
        let Some(kind) = self.table.kind_for(name) else {
            warn!(tool = name, "unknown tool requested");
            return ToolOutcome::failed(&ToolError::NotFound {
                what: format!("tool `{name}`"),
            });
        };
        debug!(tool = %kind, "dispatching tool call");

        let args = Args {
            tool: kind.name(),
            map: arguments,
        };
        match kind {
            ToolKind::RunTerminalCommand => {
                let parsed = args.required_str("command").and_then(|command| {
                    let timeout = args
                        .optional_f64("timeout")?
                        .map(|secs| {
                            if secs > 0.0 && secs.is_finite() {
                                Ok(Duration::from_secs_f64(secs.min(MAX_COMMAND_TIMEOUT.as_secs_f64())))
                            } else {
                                Err(args.invalid("`timeout` must be a positive number of seconds"))
                            }
                        })
                        .transpose()?;
                    Ok((command, timeout))
                });
                match parsed {
                    Ok((command, timeout)) => self.run_terminal_command(command, timeout).await,
                    Err(e) => self.finish(kind, Err(e)),
                }
            }
            ToolKind::FileOperation => {
                let parsed = (|| {
                    let op: FileOp = args.required_str("operation")?.parse()?;
                    let path = args.required_str("path")?;
                    let content = args.optional_str("content")?;
                    Ok::<_, ToolError>((op, path, content))
                })();
                match parsed {
                    Ok((op, path, content)) => self.file_operation(op, path, content).await,
                    Err(e) => self.finish(kind, Err(e)),
                }
            }
            ToolKind::BrowseWebsite => {
                let parsed = (|| {
                    let url = args.required_str("url")?;
                    let selector = args.optional_str("selector")?;
                    let max_length = args.optional_usize("maxContentLength")?;
                    Ok::<_, ToolError>((url, selector, max_length))
                })();
                match parsed {
                    Ok((url, selector, max_length)) => {
                        self.browse_website(url, selector, max_length).await
                    }
                    Err(e) => self.finish(kind, Err(e)),
                }
            }
            ToolKind::WebSearch => {
                let parsed = (|| {
                    let query = args.required_str("query")?;
                    let num_results = args.optional_usize("numResults")?;
                    let engine = args.optional_str("engine")?;
                    Ok::<_, ToolError>((query, num_results, engine))
                })();
                match parsed {
                    Ok((query, num_results, engine)) => {
                        self.web_search(query, num_results, engine).await
                    }
                    Err(e) => self.finish(kind, Err(e)),
                }
            }
        }
    }

    fn finish(&self, kind: ToolKind, result: Result<String>) -> ToolOutcome {
        match &result {
            Ok(output) => debug!(tool = %kind, bytes = output.len(), "tool succeeded"),
            Err(ToolError::Unsafe { reason }) => {
                warn!(tool = %kind, reason = %reason, "tool call rejected")
            }
            Err(e) => debug!(tool = %kind, error = %e, "tool failed"),
        }
        ToolOutcome::from(result)
    }
}

/// Typed access to a tool's JSON arguments.
struct Args<'a> {
    tool: &'static str,
    map: &'a Map<String, Value>,
}

impl<'a> Args<'a> {
    fn invalid(&self, reason: impl Into<String>) -> ToolError {
        ToolError::invalid(self.tool, reason)
    }

    fn present(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    fn required_str(&self, key: &str) -> Result<&'a str> {
        self.optional_str(key)?
            .ok_or_else(|| self.invalid(format!("missing required parameter `{key}`")))
    }

    fn optional_str(&self, key: &str) -> Result<Option<&'a str>> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(self.invalid(format!("`{key}` must be a string"))),
        }
    }

    /// Numbers are also accepted as numeric strings.
    fn optional_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.invalid(format!("`{key}` is out of range"))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| self.invalid(format!("`{key}` must be a number"))),
            Some(_) => Err(self.invalid(format!("`{key}` must be a number"))),
        }
    }

    fn optional_usize(&self, key: &str) -> Result<Option<usize>> {
        match self.optional_f64(key)? {
            None => Ok(None),
            Some(n) if n >= 0.0 && n.is_finite() => Ok(Some(n as usize)),
            Some(_) => Err(self.invalid(format!("`{key}` must be a non-negative integer"))),
        }
    }
}
