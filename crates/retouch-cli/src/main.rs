use std::io::{self, ErrorKind, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use retouch_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use retouch_contracts::credentials::FileCredentialStore;
use retouch_contracts::events::EventWriter;
use retouch_contracts::history::{version_label, History, ImageRemoval, UploadRoute};
use retouch_contracts::images::RawUpload;
use retouch_contracts::EditorError;
use retouch_engine::{
    default_gateway_registry, DirectorySink, EditorConfig, GatewayResult, ImageGateway,
    PendingSubmit, Session,
};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "retouch",
    version,
    about = "Conversational image editing on top of a generative image model"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Gateway name (`gemini` or `dryrun`); overrides RETOUCH_GATEWAY.
    #[arg(long, global = true)]
    gateway: Option<String>,
    /// Model name; overrides RETOUCH_IMAGE_MODEL.
    #[arg(long, global = true)]
    model: Option<String>,
    /// State directory; overrides RETOUCH_HOME.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    /// Download directory.
    #[arg(long, global = true, default_value = ".")]
    out: PathBuf,
    /// Event log path; defaults to `<state dir>/events.jsonl`.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive editing session.
    Chat,
    /// Generate one image from a text prompt.
    Generate(GenerateArgs),
    /// Edit one or more images with a text instruction.
    Edit(EditArgs),
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
}

#[derive(Debug, Args)]
struct EditArgs {
    #[arg(long = "image", required = true)]
    images: Vec<PathBuf>,
    #[arg(long)]
    prompt: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("retouch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = resolve_config(&cli.global);
    match cli.command {
        Command::Chat => {
            run_chat(&cli.global, &config)?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(&cli.global, &config, args),
        Command::Edit(args) => run_edit(&cli.global, &config, args),
    }
}

fn resolve_config(global: &GlobalArgs) -> EditorConfig {
    let mut config = EditorConfig::from_env();
    if let Some(gateway) = global.gateway.as_deref() {
        config.gateway = gateway.trim().to_ascii_lowercase();
    }
    if let Some(model) = global.model.as_deref() {
        config.model = model.trim().to_string();
    }
    if let Some(state_dir) = global.state_dir.clone() {
        config.state_dir = state_dir;
    }
    config
}

fn resolve_gateway(config: &EditorConfig) -> Result<Arc<dyn ImageGateway>> {
    let registry = default_gateway_registry(config);
    registry.get(&config.gateway).with_context(|| {
        format!(
            "unknown gateway '{}' (available: {})",
            config.gateway,
            registry.names().join(", ")
        )
    })
}

fn open_session(global: &GlobalArgs, config: &EditorConfig) -> Result<Session> {
    let events_path = global
        .events
        .clone()
        .unwrap_or_else(|| config.events_path());
    let events = EventWriter::new(events_path, Uuid::new_v4().to_string());
    let store = FileCredentialStore::new(config.credentials_path());
    Session::new(Box::new(store), events)
}

fn surface(err: EditorError) -> anyhow::Error {
    anyhow!(err.user_message())
}

fn run_generate(global: &GlobalArgs, config: &EditorConfig, args: GenerateArgs) -> Result<i32> {
    let gateway = resolve_gateway(config)?;
    let mut session = open_session(global, config)?;
    session
        .submit(gateway.as_ref(), &args.prompt)
        .map_err(surface)?;
    write_after_image(&session, &global.out)?;
    Ok(0)
}

fn run_edit(global: &GlobalArgs, config: &EditorConfig, args: EditArgs) -> Result<i32> {
    let gateway = resolve_gateway(config)?;
    let mut session = open_session(global, config)?;
    let uploads = load_uploads(&args.images)?;
    session.upload(uploads).map_err(surface)?;
    session
        .submit(gateway.as_ref(), &args.prompt)
        .map_err(surface)?;
    write_after_image(&session, &global.out)?;
    Ok(0)
}

fn write_after_image(session: &Session, out: &Path) -> Result<()> {
    let sink = DirectorySink::new(out);
    let path = session
        .download_after(&sink)
        .map_err(surface)?
        .context("the model returned no image")?;
    println!("{}", path.display());
    if let Some(note) = session.display().note_after {
        println!("Note: {note}");
    }
    Ok(())
}

fn load_uploads(paths: &[PathBuf]) -> Result<Vec<RawUpload>> {
    paths
        .iter()
        .map(|path| RawUpload::from_path(path))
        .collect()
}

enum ChatEvent {
    Line(String),
    Eof,
    Finished(PendingSubmit, Result<GatewayResult, EditorError>),
}

struct ChatContext {
    gateway: Arc<dyn ImageGateway>,
    sink: DirectorySink,
    tx: mpsc::Sender<ChatEvent>,
}

fn run_chat(global: &GlobalArgs, config: &EditorConfig) -> Result<()> {
    let gateway = resolve_gateway(config)?;
    let mut session = open_session(global, config)?;
    let (tx, rx) = mpsc::channel();
    spawn_input_reader(tx.clone())?;
    let ctx = ChatContext {
        gateway,
        sink: DirectorySink::new(&global.out),
        tx,
    };

    let mut stdout = io::stdout();
    writeln!(
        stdout,
        "Retouch chat started ({} gateway). Type /help for commands.",
        ctx.gateway.name()
    )?;
    if !session.has_credential() {
        writeln!(stdout, "No API key stored yet; set one with /key <value>.")?;
    }

    let mut input_closed = false;
    loop {
        if !input_closed {
            write!(stdout, "> ")?;
            stdout.flush()?;
        }
        let Ok(event) = rx.recv() else {
            break;
        };
        match event {
            ChatEvent::Line(line) => {
                let intent = parse_intent(&line);
                handle_intent(&mut session, &ctx, &intent, &mut stdout)?;
            }
            ChatEvent::Eof => {
                input_closed = true;
                if !session.is_busy() {
                    break;
                }
            }
            ChatEvent::Finished(pending, outcome) => {
                writeln!(stdout)?;
                handle_completion(&mut session, pending, outcome, &mut stdout)?;
                if input_closed {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn spawn_input_reader(tx: mpsc::Sender<ChatEvent>) -> Result<()> {
    thread::Builder::new()
        .name("retouch-input".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) => {
                        let _ = tx.send(ChatEvent::Eof);
                        break;
                    }
                    Ok(_) => {
                        let input = line.trim_end_matches(['\n', '\r']).to_string();
                        if tx.send(ChatEvent::Line(input)).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => {
                        let _ = tx.send(ChatEvent::Eof);
                        break;
                    }
                }
            }
        })
        .context("input reader thread spawn failed")?;
    Ok(())
}

fn handle_intent(
    session: &mut Session,
    ctx: &ChatContext,
    intent: &Intent,
    out: &mut dyn Write,
) -> Result<()> {
    match intent.action.as_str() {
        "noop" => {}
        "help" => {
            writeln!(out, "Commands: {}", CHAT_HELP_COMMANDS.join(" "))?;
            writeln!(out, "Anything else is sent as an edit (or generation) prompt.")?;
        }
        "submit" => {
            let prompt = intent.prompt.clone().unwrap_or_default();
            start_submit(session, ctx, &prompt, out)?;
        }
        "submit_pending" => {
            let prompt = session.pending_prompt().to_string();
            start_submit(session, ctx, &prompt, out)?;
        }
        "upload" => {
            let paths: Vec<PathBuf> = intent.path_args().into_iter().map(PathBuf::from).collect();
            if paths.is_empty() {
                writeln!(out, "/upload requires at least one path")?;
                return Ok(());
            }
            let uploads = match load_uploads(&paths) {
                Ok(uploads) => uploads,
                Err(err) => {
                    writeln!(out, "Upload failed: {err:#}")?;
                    return Ok(());
                }
            };
            let count = uploads.len();
            match session.upload(uploads) {
                Ok(UploadRoute::NewVersion(index)) => writeln!(
                    out,
                    "Started {} with {count} image(s).",
                    version_label(index)
                )?,
                Ok(UploadRoute::ExtendedCurrent(index)) => {
                    writeln!(out, "Added {count} image(s) to {}.", version_label(index))?
                }
                Ok(UploadRoute::Unchanged) => {}
                Err(err) => report_error(out, &err)?,
            }
        }
        "revert" => {
            let Some(number) = intent.number_arg("version") else {
                writeln!(out, "/revert requires a version number (see /history)")?;
                return Ok(());
            };
            let index = number - 1;
            match session.revert_to(index) {
                Ok(()) => {
                    writeln!(out, "Now editing {}.", version_label(index))?;
                    if !session.pending_prompt().is_empty() {
                        writeln!(
                            out,
                            "Prompt: {} (send /submit to run it again)",
                            session.pending_prompt()
                        )?;
                    }
                }
                Err(err) => report_error(out, &err)?,
            }
        }
        "reset" => {
            if session.history().is_empty() {
                writeln!(out, "Nothing to reset.")?;
            } else {
                let discarded = session.reset_to_original();
                writeln!(out, "Back to Original ({discarded} version(s) discarded).")?;
            }
        }
        "remove_version" => {
            let Some(number) = intent.number_arg("version") else {
                writeln!(out, "/remove requires a version number (see /history)")?;
                return Ok(());
            };
            match session.remove_version(number - 1) {
                Ok(()) => writeln!(out, "Removed {}.", version_label(number - 1))?,
                Err(err) => report_error(out, &err)?,
            }
        }
        "remove_image" => {
            let (Some(version), Some(image)) =
                (intent.number_arg("version"), intent.number_arg("image"))
            else {
                writeln!(out, "/remove_image requires a version and an image number")?;
                return Ok(());
            };
            match session.remove_image_from_version(version - 1, image - 1) {
                Ok(ImageRemoval::ImageOnly) => writeln!(
                    out,
                    "Removed image {image} from {}.",
                    version_label(version - 1)
                )?,
                Ok(ImageRemoval::WholeVersion) => writeln!(
                    out,
                    "Removed {} (it had no other images).",
                    version_label(version - 1)
                )?,
                Err(err) => report_error(out, &err)?,
            }
        }
        "clear" => {
            session.clear_all();
            writeln!(out, "History cleared.")?;
        }
        "set_credential" => {
            let Some(credential) = intent.string_arg("credential") else {
                writeln!(out, "/key requires a value")?;
                return Ok(());
            };
            match session.set_credential(credential) {
                Ok(()) => writeln!(
                    out,
                    "API key saved ({}).",
                    session.masked_credential().unwrap_or_default()
                )?,
                Err(err) => report_error(out, &err)?,
            }
        }
        "clear_credential" => match session.clear_credential() {
            Ok(()) => writeln!(out, "API key cleared; history reset.")?,
            Err(err) => report_error(out, &err)?,
        },
        "history" => {
            for line in format_history(session.history()) {
                writeln!(out, "{line}")?;
            }
        }
        "status" => {
            for line in format_status(session, ctx.gateway.name()) {
                writeln!(out, "{line}")?;
            }
        }
        "download" => match intent.number_arg("version") {
            Some(number) => match session.download_version(&ctx.sink, number - 1) {
                Ok(paths) => {
                    for path in paths {
                        writeln!(out, "Saved {}", path.display())?;
                    }
                }
                Err(err) => report_error(out, &err)?,
            },
            None => match session.download_after(&ctx.sink) {
                Ok(Some(path)) => writeln!(out, "Saved {}", path.display())?,
                Ok(None) => writeln!(out, "Nothing to download yet.")?,
                Err(err) => report_error(out, &err)?,
            },
        },
        _ => {
            let command = intent
                .string_arg("command")
                .map(str::to_string)
                .unwrap_or_else(|| intent.action.clone());
            writeln!(out, "Unknown command: /{command}")?;
        }
    }
    Ok(())
}

/// Starts a gateway call on a worker thread. The result comes back through
/// the chat channel so input keeps flowing while the request is in flight.
fn start_submit(
    session: &mut Session,
    ctx: &ChatContext,
    prompt: &str,
    out: &mut dyn Write,
) -> Result<()> {
    let pending = match session.begin_submit(prompt) {
        Ok(pending) => pending,
        Err(err) => return report_error(out, &err),
    };
    let mode = pending.request().mode();
    writeln!(out, "Working ({mode}, request #{})...", pending.ticket())?;

    let gateway = Arc::clone(&ctx.gateway);
    let tx = ctx.tx.clone();
    let job = pending.clone();
    let spawned = thread::Builder::new()
        .name("retouch-gateway".to_string())
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                job.request().dispatch(gateway.as_ref())
            }))
            .unwrap_or_else(|_| {
                Err(EditorError::GatewayFailure(
                    "gateway worker panicked".to_string(),
                ))
            });
            let _ = tx.send(ChatEvent::Finished(job, outcome));
        });
    if let Err(err) = spawned {
        let outcome = Err(EditorError::GatewayFailure(format!(
            "gateway thread spawn failed: {err}"
        )));
        handle_completion(session, pending, outcome, out)?;
    }
    Ok(())
}

fn handle_completion(
    session: &mut Session,
    pending: PendingSubmit,
    outcome: Result<GatewayResult, EditorError>,
    out: &mut dyn Write,
) -> Result<()> {
    let ticket = pending.ticket();
    match session.complete_submit(pending, outcome) {
        Ok(receipt) => {
            write!(out, "Created {}", version_label(receipt.index))?;
            if receipt.discarded > 0 {
                write!(out, " ({} later version(s) discarded)", receipt.discarded)?;
            }
            writeln!(out, ".")?;
            if let Some(note) = session.display().note_after {
                writeln!(out, "Note: {note}")?;
            }
        }
        Err(err) => {
            write!(out, "Request #{ticket}: ")?;
            report_error(out, &err)?;
        }
    }
    Ok(())
}

fn report_error(out: &mut dyn Write, err: &EditorError) -> Result<()> {
    writeln!(out, "Error: {}", err.user_message())?;
    Ok(())
}

fn format_history(history: &History) -> Vec<String> {
    if history.is_empty() {
        return vec![
            "History is empty. Upload an image or type a prompt to generate one.".to_string(),
        ];
    }
    history
        .versions()
        .iter()
        .enumerate()
        .map(|(index, version)| {
            let marker = if history.cursor() == Some(index) { "*" } else { " " };
            let mut line = format!(
                "{marker} {}. {}: {} image(s)",
                index + 1,
                version_label(index),
                version.images().len()
            );
            if let Some(prompt) = version.prompt_used() {
                line.push_str(&format!(", edited with \"{prompt}\""));
            }
            line
        })
        .collect()
}

fn format_status(session: &Session, gateway: &str) -> Vec<String> {
    let display = session.display();
    let editing = session
        .history()
        .cursor()
        .map(version_label)
        .unwrap_or_else(|| "nothing".to_string());
    let mut lines = vec![
        format!("Gateway: {gateway}"),
        format!(
            "API key: {}",
            session
                .masked_credential()
                .unwrap_or_else(|| "not set".to_string())
        ),
        format!(
            "Versions: {}, editing {editing}",
            session.history().len()
        ),
        format!("Busy: {}", if display.busy { "yes" } else { "no" }),
    ];
    if !display.pending_prompt.is_empty() {
        lines.push(format!("Pending prompt: {}", display.pending_prompt));
    }
    if let Some(error) = display.last_error {
        lines.push(format!("Last error: {error}"));
    }
    lines
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    use retouch_contracts::chat::parse_intent;
    use retouch_contracts::credentials::MemoryCredentialStore;
    use retouch_contracts::events::EventWriter;
    use retouch_engine::{DirectorySink, DryrunGateway, Session};

    use super::{
        format_history, format_status, handle_completion, handle_intent, ChatContext, ChatEvent,
    };

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3, 4];

    fn chat_fixture(
        dir: &Path,
    ) -> anyhow::Result<(Session, ChatContext, mpsc::Receiver<ChatEvent>)> {
        let session = Session::new(
            Box::new(MemoryCredentialStore::with_credential("test-key")),
            EventWriter::new(dir.join("events.jsonl"), "cli-test"),
        )?;
        let (tx, rx) = mpsc::channel();
        let ctx = ChatContext {
            gateway: Arc::new(DryrunGateway::new()),
            sink: DirectorySink::new(dir.join("out")),
            tx,
        };
        Ok((session, ctx, rx))
    }

    fn send(session: &mut Session, ctx: &ChatContext, line: &str) -> anyhow::Result<String> {
        let mut out = Vec::new();
        handle_intent(session, ctx, &parse_intent(line), &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    fn finish_next(
        session: &mut Session,
        rx: &mpsc::Receiver<ChatEvent>,
    ) -> anyhow::Result<String> {
        let mut out = Vec::new();
        match rx.recv_timeout(Duration::from_secs(10))? {
            ChatEvent::Finished(pending, outcome) => {
                handle_completion(session, pending, outcome, &mut out)?
            }
            _ => anyhow::bail!("expected a finished request"),
        }
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn chat_upload_edit_revert_and_download() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image_path = temp.path().join("cat.png");
        fs::write(&image_path, PNG_MAGIC)?;
        let (mut session, ctx, rx) = chat_fixture(temp.path())?;

        let uploaded = send(&mut session, &ctx, &format!("/upload \"{}\"", image_path.display()))?;
        assert_eq!(uploaded, "Started Original with 1 image(s).\n");

        let started = send(&mut session, &ctx, "add a party hat")?;
        assert!(started.starts_with("Working (edit, request #1)"));
        let busy = send(&mut session, &ctx, "add a scarf")?;
        assert_eq!(busy, "Error: another request is already in flight\n");

        let finished = finish_next(&mut session, &rx)?;
        assert!(finished.starts_with("Created V2."));
        assert!(finished.contains("Note: dryrun: add a party hat"));

        let history = send(&mut session, &ctx, "/history")?;
        assert!(history.contains("  1. Original: 1 image(s), edited with \"add a party hat\""));
        assert!(history.contains("* 2. V2: 1 image(s)"));

        let reverted = send(&mut session, &ctx, "/revert 1")?;
        assert!(reverted.contains("Now editing Original."));
        assert!(reverted.contains("Prompt: add a party hat"));

        let downloaded = send(&mut session, &ctx, "/download 1")?;
        assert!(downloaded.contains("edited-original.png"));
        assert!(temp.path().join("out").join("edited-original.png").exists());
        Ok(())
    }

    #[test]
    fn chat_fences_results_after_history_changes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, ctx, rx) = chat_fixture(temp.path())?;

        send(&mut session, &ctx, "a quiet harbour")?;
        send(&mut session, &ctx, "/clear")?;
        let finished = finish_next(&mut session, &rx)?;
        assert!(finished.contains("history changed while the request was in flight"));
        assert!(session.history().is_empty());
        assert!(!session.is_busy());
        Ok(())
    }

    #[test]
    fn chat_reports_command_errors() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, ctx, _rx) = chat_fixture(temp.path())?;

        assert_eq!(
            send(&mut session, &ctx, "/revert 3")?,
            "Error: index 2 is out of range for 0 item(s)\n"
        );
        assert_eq!(
            send(&mut session, &ctx, "/revert")?,
            "/revert requires a version number (see /history)\n"
        );
        assert_eq!(send(&mut session, &ctx, "/frobnicate")?, "Unknown command: /frobnicate\n");
        assert_eq!(send(&mut session, &ctx, "/download")?, "Nothing to download yet.\n");
        assert!(send(&mut session, &ctx, "/upload missing.png")?.starts_with("Upload failed:"));

        assert_eq!(send(&mut session, &ctx, "/key_clear")?, "API key cleared; history reset.\n");
        assert_eq!(
            send(&mut session, &ctx, "a lighthouse")?,
            "Error: API key is missing.\n"
        );
        assert_eq!(send(&mut session, &ctx, "/key AIzaNew")?, "API key saved (AIza…).\n");
        Ok(())
    }

    #[test]
    fn history_and_status_render_labels() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (mut session, _ctx, _rx) = chat_fixture(temp.path())?;
        assert_eq!(format_history(session.history()).len(), 1);

        session.set_pending_prompt("brighter");
        let status = format_status(&session, "dryrun");
        assert_eq!(status[0], "Gateway: dryrun");
        assert_eq!(status[1], "API key: test…");
        assert_eq!(status[2], "Versions: 0, editing nothing");
        assert_eq!(status[3], "Busy: no");
        assert_eq!(status[4], "Pending prompt: brighter");
        Ok(())
    }
}
