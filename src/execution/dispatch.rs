//! Step Dispatch
//!
//! Routes a step to its handler and contains its failures. Whatever happens
//! inside a handler (an error, a failed command, a panic), [`Dispatcher::dispatch`]
//! logs it and returns normally so the caller can move on to the next step.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::actions::completion::compose_prompt;
use crate::actions::{ActionError, Actions, BrowserCommand, ShellRequest};
use crate::context::{render, Context, ExpressionError, TemplateError};
use crate::workflow::{Step, StepKind};

use super::outputs::{OutputStore, WriteMode};
use super::parallel::{JoinPolicy, DEFAULT_MAX_WORKERS};

/// Seconds a browser `wait` action waits when the step gives no timeout.
const DEFAULT_WAIT_SECONDS: u64 = 30;

/// Key used for background logs of steps without an id.
const ANONYMOUS_BACKGROUND_KEY: &str = "background";

/// A failure inside a single step. Always caught at the step boundary.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("invalid condition '{condition}': {source}")]
    Expression {
        condition: String,
        #[source]
        source: ExpressionError,
    },

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("{0}")]
    InvalidValue(String),

    #[error("failed to persist output: {0}")]
    Io(#[from] std::io::Error),

    #[error("step panicked: {0}")]
    Panicked(String),
}

/// What the caller should do after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the following step
    Next,
    /// Move the top-level program counter to the step with this id
    Jump(String),
}

/// The result of dispatching one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub flow: Flow,
    /// False when the step or anything it ran sequentially failed
    pub succeeded: bool,
}

impl StepOutcome {
    pub fn next() -> Self {
        Self {
            flow: Flow::Next,
            succeeded: true,
        }
    }

    pub fn failed() -> Self {
        Self {
            flow: Flow::Next,
            succeeded: false,
        }
    }

    pub fn is_jump(&self) -> bool {
        matches!(self.flow, Flow::Jump(_))
    }

    /// Folds the outcome of a later step into this one.
    pub(crate) fn then(self, later: StepOutcome) -> StepOutcome {
        StepOutcome {
            flow: later.flow,
            succeeded: self.succeeded && later.succeeded,
        }
    }
}

/// Where a step sits in the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Directly in the workflow's step list
    TopLevel,
    /// Inside a loop or condition body; a `goto` ends the body and moves
    /// the top-level program counter
    Nested,
    /// Inside a parallel branch, which has no program counter to move
    Branch,
}

impl Scope {
    /// Scope of a sequential body run by a step in this scope.
    pub fn body(self) -> Scope {
        match self {
            Scope::Branch => Scope::Branch,
            Scope::TopLevel | Scope::Nested => Scope::Nested,
        }
    }
}

/// Executes steps against a context.
///
/// Cloning is cheap and shares the handlers, output store and failure count,
/// so parallel branches each get a clone.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    actions: Actions,
    outputs: Arc<OutputStore>,
    max_workers: usize,
    failures: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new(actions: Actions, outputs: OutputStore) -> Self {
        Self {
            actions,
            outputs: Arc::new(outputs),
            max_workers: DEFAULT_MAX_WORKERS,
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the worker capacity used by parallel steps without `max_workers`.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Number of step failures recorded so far, nested and parallel included.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn outputs(&self) -> &OutputStore {
        &self.outputs
    }

    pub(crate) fn capacity(&self, max_workers: Option<usize>) -> usize {
        max_workers.unwrap_or(self.max_workers).max(1)
    }

    /// Executes one step, never propagating its failure.
    ///
    /// A step with an id has `<id>.output` cleared before its handler runs.
    pub fn dispatch(&self, step: &Step, ctx: &Context, scope: Scope) -> StepOutcome {
        if let Some(key) = step.output_key() {
            ctx.set(key, "");
        }

        info!("Executing step: {}", step.display_name());

        match panic::catch_unwind(AssertUnwindSafe(|| self.route(step, ctx, scope))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                self.record_failure(step, &e);
                StepOutcome::failed()
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                self.record_failure(step, &StepError::Panicked(message));
                StepOutcome::failed()
            }
        }
    }

    fn record_failure(&self, step: &Step, e: &StepError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        error!("Error executing step {} : {}", step.display_name(), e);
    }

    fn route(&self, step: &Step, ctx: &Context, scope: Scope) -> Result<StepOutcome, StepError> {
        let outcome = match &step.kind {
            StepKind::SystemCommand {
                command,
                working_dir,
                background,
                output_path,
            } => {
                self.run_system_command(
                    step,
                    command,
                    working_dir.as_deref(),
                    *background,
                    output_path.as_deref(),
                    ctx,
                )?;
                StepOutcome::next()
            }
            StepKind::BrowserAction {
                action,
                url,
                selector,
                text,
                timeout,
            } => {
                self.run_browser_action(
                    action,
                    url.as_deref(),
                    selector.as_deref(),
                    text.as_deref(),
                    *timeout,
                    ctx,
                )?;
                StepOutcome::next()
            }
            StepKind::AiAnalyze {
                prompt,
                input,
                output_path,
            } => {
                self.run_ai_analyze(step, prompt, input.as_deref(), output_path.as_deref(), ctx)?;
                StepOutcome::next()
            }
            StepKind::Notification { message } => {
                self.run_notification(message, ctx)?;
                StepOutcome::next()
            }
            StepKind::Condition {
                condition,
                then,
                otherwise,
            } => self.run_condition(condition, then, otherwise, ctx, scope.body())?,
            StepKind::ForLoop {
                variable,
                start,
                end,
                increment,
                steps,
            } => self.run_for_loop(variable, start, end, increment, steps, ctx, scope.body())?,
            StepKind::WhileLoop { condition, steps } => {
                self.run_while_loop(condition, steps, ctx, scope.body())?
            }
            StepKind::DoWhileLoop { condition, steps } => {
                self.run_do_while_loop(condition, steps, ctx, scope.body())?
            }
            StepKind::SetVariable { variable, value } => {
                self.set_variable(variable, value, ctx)?;
                StepOutcome::next()
            }
            StepKind::IncrementVariable { variable, amount } => {
                self.increment_variable(variable, amount, ctx)?;
                StepOutcome::next()
            }
            StepKind::SplitList { list, groups } => {
                self.split_list(step, list, groups, ctx)?;
                StepOutcome::next()
            }
            StepKind::ParallelForEach {
                list,
                item_variable,
                steps,
                max_workers,
            } => self.run_parallel_for_each(list, item_variable, steps, *max_workers, ctx)?,
            StepKind::ParallelAndBranch {
                branches,
                max_workers,
            } => self.run_parallel_branches(branches, *max_workers, JoinPolicy::All, ctx),
            StepKind::ParallelOrBranch {
                branches,
                max_workers,
            } => self.run_parallel_branches(branches, *max_workers, JoinPolicy::First, ctx),
            StepKind::Goto { target } => StepOutcome {
                flow: jump(target, scope),
                succeeded: true,
            },
            StepKind::Label => {
                debug!("Reached label '{}'", step.display_name());
                StepOutcome::next()
            }
            StepKind::Unsupported => {
                warn!("Unsupported step type for step: {}", step.display_name());
                StepOutcome::next()
            }
        };
        Ok(outcome)
    }

    fn run_system_command(
        &self,
        step: &Step,
        command: &str,
        working_dir: Option<&str>,
        background: bool,
        output_path: Option<&str>,
        ctx: &Context,
    ) -> Result<(), StepError> {
        let command = render(command, ctx)?;
        let working_dir = match working_dir {
            Some(dir) => Some(PathBuf::from(render(dir, ctx)?)),
            None => None,
        };

        info!("Executing system command: {}", command);

        let mut request = ShellRequest {
            command,
            working_dir,
            background_log: None,
        };

        if background {
            let key = step.id.as_deref().unwrap_or(ANONYMOUS_BACKGROUND_KEY);
            let log_path = self.outputs.background_log(key);
            info!("Running in background, output goes to {}", log_path.display());
            request.background_log = Some(log_path);
            self.actions.shell.run(&request)?;
            return Ok(());
        }

        let output = self.actions.shell.run(&request)?;

        if !output.stderr.trim().is_empty() {
            warn!("System command stderr: {}", output.stderr.trim());
        }
        let stdout = output.stdout.trim();
        info!("System command stdout: {}", stdout);

        self.publish(step, ctx, stdout, output_path, WriteMode::Append)?;

        if !output.success() {
            return Err(ActionError::Process { code: output.code }.into());
        }
        Ok(())
    }

    fn run_browser_action(
        &self,
        action: &str,
        url: Option<&str>,
        selector: Option<&str>,
        text: Option<&str>,
        timeout: Option<u64>,
        ctx: &Context,
    ) -> Result<(), StepError> {
        let command = match action {
            "navigate" => BrowserCommand::Navigate {
                url: required(url, "url", ctx)?,
            },
            "click" => BrowserCommand::Click {
                selector: required(selector, "selector", ctx)?,
            },
            "enter_text" | "fill" => BrowserCommand::Fill {
                selector: required(selector, "selector", ctx)?,
                text: required(text, "text", ctx)?,
            },
            "wait" | "wait_for" => BrowserCommand::WaitFor {
                selector: required(selector, "selector", ctx)?,
                timeout: Duration::from_secs(timeout.unwrap_or(DEFAULT_WAIT_SECONDS)),
            },
            other => {
                warn!("Unsupported browser action: {}", other);
                return Ok(());
            }
        };

        info!("Browser action: {:?}", command);
        command.perform(self.actions.browser.as_ref())?;
        Ok(())
    }

    fn run_ai_analyze(
        &self,
        step: &Step,
        prompt: &str,
        input: Option<&str>,
        output_path: Option<&str>,
        ctx: &Context,
    ) -> Result<(), StepError> {
        let prompt = render(prompt, ctx)?;
        let input = match input {
            Some(input) => render(input, ctx)?,
            None => String::new(),
        };

        info!("Sending prompt: {}, input: {}", prompt, input);
        let generated = self
            .actions
            .completion
            .complete(&compose_prompt(&prompt, &input))?;
        let output = generated.trim();
        info!("Generated output: {}", output);

        self.publish(step, ctx, output, output_path, WriteMode::Overwrite)
    }

    fn run_notification(&self, message: &str, ctx: &Context) -> Result<(), StepError> {
        let message = render(message, ctx)?;
        self.actions.notifier.notify(&message)?;
        Ok(())
    }

    /// Publishes a step's text under `<id>.output` and persists it.
    ///
    /// The file is `output_path` when declared, otherwise the step id.
    fn publish(
        &self,
        step: &Step,
        ctx: &Context,
        text: &str,
        output_path: Option<&str>,
        mode: WriteMode,
    ) -> Result<(), StepError> {
        if let Some(id) = &step.id {
            ctx.set_output(id, text);
        }

        let file_name = match output_path {
            Some(path) => Some(render(path, ctx)?),
            None => step.id.clone(),
        };
        if let Some(name) = file_name {
            self.outputs.persist(&name, text, mode)?;
        }
        Ok(())
    }
}

fn jump(target: &str, scope: Scope) -> Flow {
    match scope {
        Scope::TopLevel | Scope::Nested => Flow::Jump(target.to_string()),
        Scope::Branch => {
            warn!(
                "goto '{}' inside a parallel branch cannot move the program counter, ignoring",
                target
            );
            Flow::Next
        }
    }
}

fn required(field: Option<&str>, name: &str, ctx: &Context) -> Result<String, StepError> {
    let raw = field
        .ok_or_else(|| StepError::InvalidValue(format!("browser action requires '{}'", name)))?;
    Ok(render(raw, ctx)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::actions::{
        BrowserDriver, BrowserSession, Notifier, ShellOutput, ShellRunner, TextCompletion,
    };
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    /// Shell fake: echoes commands, `fail:<code>` exits non-zero,
    /// `sleep:<ms>` blocks, and every request is recorded.
    #[derive(Default, Clone)]
    pub(crate) struct FakeShell {
        pub requests: Arc<Mutex<Vec<ShellRequest>>>,
    }

    impl ShellRunner for FakeShell {
        fn run(&self, request: &ShellRequest) -> Result<ShellOutput, ActionError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(ms) = request.command.strip_prefix("sleep:") {
                std::thread::sleep(Duration::from_millis(ms.parse().unwrap()));
                return Ok(ShellOutput::default());
            }
            if let Some(code) = request.command.strip_prefix("fail:") {
                return Ok(ShellOutput {
                    stdout: "partial\n".to_string(),
                    stderr: "boom".to_string(),
                    code: Some(code.parse().unwrap()),
                });
            }
            if request.command == "panic" {
                panic!("shell exploded");
            }
            Ok(ShellOutput {
                stdout: format!("{}\n", request.command),
                stderr: String::new(),
                code: Some(0),
            })
        }
    }

    #[derive(Default, Clone)]
    pub(crate) struct RecordingNotifier {
        pub messages: Arc<Mutex<Vec<String>>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str) -> Result<(), ActionError> {
            self.messages.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    impl RecordingNotifier {
        pub fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[derive(Default, Clone)]
    pub(crate) struct EchoCompletion {
        pub prompts: Arc<Mutex<Vec<String>>>,
    }

    impl TextCompletion for EchoCompletion {
        fn complete(&self, prompt: &str) -> Result<String, ActionError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(format!("  generated({})  ", prompt))
        }
    }

    #[derive(Default, Clone)]
    struct CountingBrowser {
        sessions: Arc<AtomicUsize>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    struct CountingSession {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl BrowserDriver for CountingBrowser {
        fn open_session(&self) -> Result<Box<dyn BrowserSession>, ActionError> {
            self.sessions.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingSession {
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    impl BrowserSession for CountingSession {
        fn navigate(&mut self, url: &str) -> Result<(), ActionError> {
            self.calls.lock().unwrap().push(format!("navigate {}", url));
            Ok(())
        }
        fn click(&mut self, selector: &str) -> Result<(), ActionError> {
            self.calls.lock().unwrap().push(format!("click {}", selector));
            Ok(())
        }
        fn fill(&mut self, selector: &str, text: &str) -> Result<(), ActionError> {
            self.calls.lock().unwrap().push(format!("fill {}={}", selector, text));
            Ok(())
        }
        fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), ActionError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("wait {} {}s", selector, timeout.as_secs()));
            Ok(())
        }
        fn close(self: Box<Self>) -> Result<(), ActionError> {
            Ok(())
        }
    }

    pub(crate) struct Harness {
        pub dispatcher: Dispatcher,
        pub shell: FakeShell,
        pub notifier: RecordingNotifier,
        pub completion: EchoCompletion,
        pub dir: TempDir,
    }

    pub(crate) fn harness() -> Harness {
        let dir = tempdir().unwrap();
        let shell = FakeShell::default();
        let notifier = RecordingNotifier::default();
        let completion = EchoCompletion::default();
        let actions = Actions::default()
            .with_shell(shell.clone())
            .with_notifier(notifier.clone())
            .with_completion(completion.clone());
        let dispatcher = Dispatcher::new(actions, OutputStore::at(dir.path()));
        Harness {
            dispatcher,
            shell,
            notifier,
            completion,
            dir,
        }
    }

    #[test]
    fn test_output_key_cleared_before_handler() {
        let h = harness();
        let ctx = Context::new();
        ctx.set_output("job", "stale");

        let step = Step::command("fail:1").with_id("job");
        assert_eq!(
            h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel),
            StepOutcome::failed()
        );

        // the failing command still published what it printed
        assert_eq!(ctx.output("job"), "partial");
        assert_eq!(h.dispatcher.failures(), 1);
    }

    #[test]
    fn test_output_key_initialized_when_handler_errors_early() {
        let h = harness();
        let ctx = Context::new();
        let step = Step::new(StepKind::AiAnalyze {
            prompt: "{{ broken".to_string(),
            input: None,
            output_path: None,
        })
        .with_id("summary");

        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(ctx.get("summary.output"), Some(json!("")));
        assert_eq!(h.dispatcher.failures(), 1);
    }

    #[test]
    fn test_system_command_publishes_and_appends() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("name", "world");
        let step = Step::command("hello {{ name }}").with_id("greet");

        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(ctx.output("greet"), "hello world");
        let persisted = std::fs::read_to_string(h.dir.path().join("greet")).unwrap();
        assert_eq!(persisted, "hello world\nhello world\n");
        assert_eq!(h.dispatcher.failures(), 0);
        assert!(h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel).succeeded);
    }

    #[test]
    fn test_system_command_working_dir_and_output_path() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("dir", "/srv");
        let step = Step::new(StepKind::SystemCommand {
            command: "ls".to_string(),
            working_dir: Some("{{ dir }}/app".to_string()),
            background: false,
            output_path: Some("listing.txt".to_string()),
        });

        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        let requests = h.shell.requests.lock().unwrap();
        assert_eq!(requests[0].working_dir, Some(PathBuf::from("/srv/app")));
        assert!(h.dir.path().join("listing.txt").exists());
    }

    #[test]
    fn test_background_command_uses_log_file() {
        let h = harness();
        let ctx = Context::new();
        let step = Step::new(StepKind::SystemCommand {
            command: "serve".to_string(),
            working_dir: None,
            background: true,
            output_path: None,
        })
        .with_id("server");

        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        let requests = h.shell.requests.lock().unwrap();
        assert_eq!(
            requests[0].background_log,
            Some(h.dir.path().join("server.background.log"))
        );
        assert_eq!(ctx.output("server"), "");
        assert!(!h.dir.path().join("server").exists());
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let h = harness();
        let ctx = Context::new();

        let outcome = h.dispatcher.dispatch(&Step::command("panic"), &ctx, Scope::TopLevel);

        assert_eq!(outcome, StepOutcome::failed());
        assert_eq!(h.dispatcher.failures(), 1);
    }

    #[test]
    fn test_ai_analyze_overwrites_output_file() {
        let h = harness();
        let ctx = Context::new();
        ctx.set_output("fetch", "page text");
        let step = Step::new(StepKind::AiAnalyze {
            prompt: "Summarize:".to_string(),
            input: Some("{{ fetch.output }}".to_string()),
            output_path: Some("summary.txt".to_string()),
        })
        .with_id("summary");

        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);
        h.dispatcher.dispatch(&step, &ctx, Scope::TopLevel);

        assert_eq!(
            *h.completion.prompts.lock().unwrap(),
            vec!["Summarize: page text", "Summarize: page text"]
        );
        assert_eq!(ctx.output("summary"), "generated(Summarize: page text)");
        let persisted = std::fs::read_to_string(h.dir.path().join("summary.txt")).unwrap();
        assert_eq!(persisted, "generated(Summarize: page text)");
    }

    #[test]
    fn test_ai_analyze_without_service_fails_softly() {
        let dir = tempdir().unwrap();
        let dispatcher = Dispatcher::new(Actions::default(), OutputStore::at(dir.path()));
        let ctx = Context::new();
        let step = Step::new(StepKind::AiAnalyze {
            prompt: "hi".to_string(),
            input: None,
            output_path: None,
        })
        .with_id("ai");

        assert_eq!(
            dispatcher.dispatch(&step, &ctx, Scope::TopLevel),
            StepOutcome::failed()
        );
        assert_eq!(ctx.output("ai"), "");
        assert_eq!(dispatcher.failures(), 1);
    }

    #[test]
    fn test_notification_is_resolved() {
        let h = harness();
        let ctx = Context::new();
        ctx.set("count", 3);

        h.dispatcher
            .dispatch(&Step::notify("{{ count }} new items"), &ctx, Scope::TopLevel);

        assert_eq!(h.notifier.messages(), vec!["3 new items"]);
    }

    #[test]
    fn test_browser_actions_use_fresh_sessions() {
        let dir = tempdir().unwrap();
        let browser = CountingBrowser::default();
        let dispatcher = Dispatcher::new(
            Actions::default().with_browser(browser.clone()),
            OutputStore::at(dir.path()),
        );
        let ctx = Context::new();
        ctx.set("site", "https://example.com");

        let browse = |action: &str, url: Option<&str>, selector: Option<&str>, text: Option<&str>| {
            Step::new(StepKind::BrowserAction {
                action: action.to_string(),
                url: url.map(str::to_string),
                selector: selector.map(str::to_string),
                text: text.map(str::to_string),
                timeout: None,
            })
        };

        for step in [
            browse("navigate", Some("{{ site }}/login"), None, None),
            browse("enter_text", None, Some("#user"), Some("ada")),
            browse("click", None, Some("#submit"), None),
            browse("wait", None, Some("#home"), None),
            browse("scroll", None, None, None),
        ] {
            dispatcher.dispatch(&step, &ctx, Scope::TopLevel);
        }

        assert_eq!(browser.sessions.load(Ordering::SeqCst), 4);
        assert_eq!(
            *browser.calls.lock().unwrap(),
            vec![
                "navigate https://example.com/login",
                "fill #user=ada",
                "click #submit",
                "wait #home 30s"
            ]
        );
        assert_eq!(dispatcher.failures(), 0);
    }

    #[test]
    fn test_browser_action_missing_field_is_step_error() {
        let h = harness();
        let step = Step::new(StepKind::BrowserAction {
            action: "navigate".to_string(),
            url: None,
            selector: None,
            text: None,
            timeout: None,
        });

        h.dispatcher.dispatch(&step, &Context::new(), Scope::TopLevel);
        assert_eq!(h.dispatcher.failures(), 1);
    }

    #[test]
    fn test_goto_scope() {
        let h = harness();
        let ctx = Context::new();
        let step = Step::goto("start");

        for scope in [Scope::TopLevel, Scope::Nested] {
            assert_eq!(
                h.dispatcher.dispatch(&step, &ctx, scope).flow,
                Flow::Jump("start".to_string())
            );
        }
        assert_eq!(
            h.dispatcher.dispatch(&step, &ctx, Scope::Branch),
            StepOutcome::next()
        );
    }

    #[test]
    fn test_body_scope() {
        assert_eq!(Scope::TopLevel.body(), Scope::Nested);
        assert_eq!(Scope::Nested.body(), Scope::Nested);
        assert_eq!(Scope::Branch.body(), Scope::Branch);
    }

    #[test]
    fn test_unsupported_and_label_are_noops() {
        let h = harness();
        let ctx = Context::new();

        h.dispatcher
            .dispatch(&Step::new(StepKind::Unsupported), &ctx, Scope::TopLevel);
        h.dispatcher.dispatch(&Step::label("here"), &ctx, Scope::TopLevel);

        assert_eq!(h.dispatcher.failures(), 0);
        assert_eq!(ctx.output("here"), "");
    }
}
