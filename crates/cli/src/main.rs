use clap::{Parser, Subcommand};
use parivar::api::{Attachment, HttpBackend};
use parivar::message::{MessageLog, Sender};
use parivar::session::{ChatSettings, Endpoints, SessionController, SessionUpdate};
use parivar::store::FileCache;
use parivar::sync::{LoadSource, Persistence};
use parivar::viewport::ViewportHost;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "parivar")]
#[command(about = "Parivar CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config, and the local chat cache directory.
    Init {
        /// Config file path (default: PARIVAR_CONFIG_PATH or ~/.parivar/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat with the health assistant (interactive). Type /help for commands.
    Chat {
        /// Config file path (default: PARIVAR_CONFIG_PATH or ~/.parivar/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Family member whose conversation to open (default from config, usually "Self").
        #[arg(long, short, value_name = "NAME")]
        member: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("parivar {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, member }) => {
            if let Err(e) = run_chat(config, member).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(parivar::config::default_config_path);
    let cache = parivar::init::init_config_dir(&path)?;
    println!(
        "initialized configuration at {} (chat cache: {})",
        path.parent().unwrap_or(Path::new(".")).display(),
        cache.display()
    );
    Ok(())
}

/// A terminal always shows the newest output, so the reader is always at the bottom.
struct TerminalViewport;

impl ViewportHost for TerminalViewport {
    fn distance_from_bottom(&self) -> f32 {
        0.0
    }

    fn scroll_to_bottom(&mut self) {}
}

/// Prints log entries the terminal has not shown yet.
#[derive(Default)]
struct Transcript {
    shown: usize,
}

impl Transcript {
    fn reset(&mut self) {
        self.shown = 0;
    }

    /// Mark everything up to `len` as shown (the user just typed it).
    fn skip_to(&mut self, len: usize) {
        self.shown = len;
    }

    fn render(&mut self, log: &MessageLog) {
        self.shown = self.shown.min(log.len());
        for m in &log.messages()[self.shown..] {
            match (m.sender, &m.attachment_ref) {
                (Sender::User, Some(a)) => println!("you: {} [{}]", m.text, a),
                (Sender::User, None) => println!("you: {}", m.text),
                (Sender::Assistant, _) => println!("< {}", m.text.trim()),
            }
        }
        self.shown = log.len();
    }
}

enum Flow {
    Continue,
    Quit,
}

const HELP: &str = "\
/member NAME       switch to another family member's conversation
/clear             clear this conversation
/attach PATH       stage an image for upload
/send-attachment   upload the staged image
/search QUERY      list messages containing QUERY
/export PATH       write a plain-text transcript
/bottom            jump to the newest message
/status            show member, pending reply, last error
/exit, /quit       leave";

async fn run_chat(config_path: Option<PathBuf>, member: Option<String>) -> anyhow::Result<()> {
    let (config, path) = parivar::config::load_config(config_path)?;
    let token = parivar::config::resolve_token(&config);
    let backend = HttpBackend::from_config(&config.api, token)?;
    let cache_dir = parivar::config::resolve_cache_dir(&config, &path);
    log::info!("chat: backend {}, cache {}", backend.base_url(), cache_dir.display());

    let persistence = Persistence::new(
        Arc::new(backend.clone()),
        Arc::new(FileCache::new(cache_dir)),
    );
    let mut settings = ChatSettings::from(&config.chat);
    if let Some(m) = member.filter(|m| !m.trim().is_empty()) {
        settings.initial_context = m.trim().into();
    }
    let mut session = SessionController::new(
        Endpoints::http(backend),
        persistence,
        settings,
        Box::new(TerminalViewport),
    );

    let (line_tx, mut lines) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut transcript = Transcript::default();
    println!("chatting as {} (type /help for commands)", session.context());
    loop {
        tokio::select! {
            update = session.next_update() => {
                if let SessionUpdate::Loaded(source) = update {
                    transcript.reset();
                    if source == LoadSource::Local {
                        println!("(offline history for {})", session.context());
                    }
                }
                transcript.render(session.log());
            }
            line = lines.recv() => {
                let Some(line) = line else { break };
                match handle_line(&mut session, &mut transcript, line.trim()) {
                    Flow::Quit => break,
                    Flow::Continue => transcript.render(session.log()),
                }
            }
        }
    }

    session.flush().await;
    Ok(())
}

fn handle_line(session: &mut SessionController, transcript: &mut Transcript, line: &str) -> Flow {
    if line.is_empty() {
        return Flow::Continue;
    }
    if !line.starts_with('/') {
        session.push_input(line);
        if session.submit() {
            transcript.skip_to(session.log().len());
        }
        return Flow::Continue;
    }

    let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
    let arg = arg.trim();
    match cmd {
        "/exit" | "/quit" => return Flow::Quit,
        "/help" => println!("{}", HELP),
        "/member" if !arg.is_empty() => {
            session.activate(arg);
            transcript.reset();
            println!("chatting as {}", arg);
        }
        "/clear" => {
            session.clear();
            transcript.reset();
            println!("(conversation cleared)");
        }
        "/attach" if !arg.is_empty() => match stage_attachment(Path::new(arg)) {
            Ok(a) => {
                println!(
                    "staged {} ({} bytes); /send-attachment to upload",
                    a.file_name,
                    a.bytes.len()
                );
                session.attach(a);
            }
            Err(e) => eprintln!("attach error: {}", e),
        },
        "/send-attachment" => {
            if !session.send_attachment() {
                println!("no attachment staged");
            }
        }
        "/search" => {
            for m in session.log().search(arg) {
                println!("  {}", m.text);
            }
        }
        "/export" if !arg.is_empty() => match std::fs::write(arg, session.log().transcript()) {
            Ok(()) => println!("exported to {}", arg),
            Err(e) => eprintln!("export error: {}", e),
        },
        "/bottom" => session.jump_to_bottom(),
        "/status" => {
            println!("member: {}", session.context());
            if session.is_loading() {
                println!("loading history…");
            }
            if let Some(text) = session.awaiting_text() {
                println!("waiting for a reply to {:?}…", text);
            }
            if let Some(e) = session.last_error() {
                println!("last error: {}", e);
            }
        }
        _ => println!("unknown command {:?}; /help lists commands", cmd),
    }
    Flow::Continue
}

fn stage_attachment(path: &Path) -> anyhow::Result<Attachment> {
    let bytes = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    let preview = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    Ok(Attachment {
        file_name,
        bytes,
        preview_ref: format!("file://{}", preview.display()),
    })
}
