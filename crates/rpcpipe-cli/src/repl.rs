//! Interactive client for a Unix socket server.
//!
//! Launch with `rpcpipe repl` to enter interactive mode.
//! Type `/help` for available commands, Tab for completion.

use std::path::{Path, PathBuf};

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};
use tokio::runtime::Handle;

use rpcpipe::UnixClient;

use crate::demo::DEMO_METHODS;
use crate::parse_params;

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/connect", "Connect to a socket (default path if omitted)"),
    ("/call", "Send a request: /call METHOD [PARAMS_JSON]"),
    ("/id", "Show or set the next request id"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

const HISTORY_FILE: &str = ".rpcpipe_history";

/// REPL helper for tab completion.
#[derive(Default)]
struct PipeHelper;

impl Completer for PipeHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];

        if !input.contains(' ') {
            let matches: Vec<Pair> = COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(input))
                .map(|(cmd, desc)| Pair {
                    display: format!("{cmd:<12} {desc}"),
                    replacement: format!("{cmd} "),
                })
                .collect();
            return Ok((0, matches));
        }

        // Method names after /call
        if let Some(args) = input.strip_prefix("/call ") {
            if args.contains(' ') {
                return Ok((pos, Vec::new()));
            }
            let matches: Vec<Pair> = DEMO_METHODS
                .iter()
                .filter(|(method, _)| method.starts_with(args))
                .map(|(method, desc)| Pair {
                    display: format!("{method:<8} {desc}"),
                    replacement: format!("{method} "),
                })
                .collect();
            return Ok((input.len() - args.len(), matches));
        }

        Ok((pos, Vec::new()))
    }
}

impl Hinter for PipeHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || line.is_empty() {
            return None;
        }
        if line.starts_with('/') && !line.contains(' ') {
            for (cmd, _) in COMMANDS {
                if cmd.starts_with(line) && *cmd != line {
                    return Some(cmd[line.len()..].to_string());
                }
            }
        }
        None
    }
}

impl Highlighter for PipeHelper {}
impl Validator for PipeHelper {}
impl Helper for PipeHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

/// Session state.
struct ReplState {
    runtime: Handle,
    socket_path: PathBuf,
    client: Option<UnixClient>,
    next_id: i64,
}

/// Run the interactive REPL. Blocks the calling thread, so call it from
/// `spawn_blocking` with a handle to the runtime that owns the socket.
pub fn run(socket_path: PathBuf, runtime: Handle) -> anyhow::Result<()> {
    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1mrpcpipe v{}\x1b[0m \x1b[90mJSON-RPC over stdio and Unix sockets\x1b[0m",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
    eprintln!(
        "    Press \x1b[36m/\x1b[0m to browse commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<PipeHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(config)?;
    rl.set_helper(Some(PipeHelper));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let hist_path = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(HISTORY_FILE);
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let mut state = ReplState {
        runtime,
        socket_path,
        client: None,
        next_id: 1,
    };
    let prompt = " \x1b[36mrpc>\x1b[0m ";

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let input = line.strip_prefix('/').unwrap_or(line);
                if input.is_empty() {
                    cmd_help();
                    continue;
                }

                let mut parts = input.splitn(2, ' ');
                let cmd = parts.next().unwrap_or("");
                let args = parts.next().unwrap_or("").trim();

                match cmd {
                    "exit" | "quit" => {
                        eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                        break;
                    }
                    "help" | "h" | "?" => cmd_help(),
                    "clear" | "cls" => eprint!("\x1b[2J\x1b[H"),
                    "connect" => cmd_connect(args, &mut state),
                    "call" => cmd_call(args, &mut state),
                    "id" => cmd_id(args, &mut state),
                    _ => {
                        eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => {
                eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    if let Some(mut client) = state.client.take() {
        let _ = state.runtime.block_on(client.close());
    }
    let _ = std::fs::create_dir_all(hist_path.parent().unwrap_or(Path::new(".")));
    let _ = rl.save_history(&hist_path);

    Ok(())
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<12} {desc}");
    }
    eprintln!();
    eprintln!("  Example: /call echo {{\"message\": \"hi\"}}");
    eprintln!();
}

fn cmd_connect(args: &str, state: &mut ReplState) {
    if !args.is_empty() {
        state.socket_path = PathBuf::from(args);
    }
    if let Some(mut old) = state.client.take() {
        let _ = state.runtime.block_on(old.close());
    }

    match state.runtime.block_on(UnixClient::connect(&state.socket_path)) {
        Ok(client) => {
            eprintln!("  Connected to {}", state.socket_path.display());
            state.client = Some(client);
        }
        Err(e) => eprintln!("  Failed to connect: {e}"),
    }
}

fn cmd_call(args: &str, state: &mut ReplState) {
    let mut parts = args.splitn(2, ' ');
    let method = parts.next().unwrap_or("");
    if method.is_empty() {
        eprintln!("  Usage: /call METHOD [PARAMS_JSON]");
        return;
    }
    let params = match parse_params(parts.next()) {
        Ok(params) => params,
        Err(e) => {
            eprintln!("  {e:#}");
            return;
        }
    };

    if state.client.is_none() {
        cmd_connect("", state);
    }
    let Some(client) = state.client.as_mut() else {
        return;
    };

    let id = state.next_id;
    state.next_id += 1;

    let outcome = state.runtime.block_on(async {
        client.send_request_with_id(id, method, params).await?;
        client.receive_response().await
    });

    match outcome {
        Ok(Some(response)) => match serde_json::to_string_pretty(&response) {
            Ok(text) => {
                for line in text.lines() {
                    eprintln!("  {line}");
                }
            }
            Err(e) => eprintln!("  Failed to render response: {e}"),
        },
        Ok(None) => {
            eprintln!("  Server closed the connection.");
            state.client = None;
        }
        Err(e) => {
            eprintln!("  Request failed: {e}");
            state.client = None;
        }
    }
}

fn cmd_id(args: &str, state: &mut ReplState) {
    if args.is_empty() {
        eprintln!("  Next request id: {}", state.next_id);
        return;
    }
    match args.parse::<i64>() {
        Ok(id) => {
            state.next_id = id;
            eprintln!("  Next request id: {id}");
        }
        Err(_) => eprintln!("  Usage: /id [N]"),
    }
}
