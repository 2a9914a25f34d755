use ab_glyph::FontVec;
use cognition_bot::analysis::orchestrator::HttpBackend;
use cognition_bot::analysis::ServiceClient;
use cognition_bot::bot::handlers::{self, Command};
use cognition_bot::bot::state::{PendingArtifact, State};
use cognition_bot::config::Settings;
use dotenvy::dotenv;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting credentials out of log output
struct RedactionPatterns {
    bot_url_token: Regex,
    bare_token: Regex,
    subscription_key: Regex,
}

impl RedactionPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            bot_url_token: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            bare_token: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            subscription_key: Regex::new(r"(?i)(ocp-apim-subscription-key['\x22:=\s]+)[0-9a-f]{32}")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .bot_url_token
            .replace_all(&output, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .bare_token
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .subscription_key
            .replace_all(&output, "$1[SUBSCRIPTION_KEY]")
            .to_string();
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length to satisfy the Write contract even when
        // the redacted text differs in size
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            patterns: self.patterns.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile redaction patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting Cognition Bot...");

    let settings = init_settings();
    let font = init_font(&settings);

    let backend = Arc::new(HttpBackend::new(ServiceClient::new(), settings.clone()));
    let bot = Bot::new(settings.telegram_token.clone());
    let dialogue_storage = InMemStorage::<State>::new();

    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![settings, backend, font, dialogue_storage])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
        patterns,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

/// Load the label font used for annotated face images. The bot cannot render
/// face results without it, so a missing or invalid font is fatal at startup.
fn init_font(settings: &Settings) -> Arc<FontVec> {
    let data = match std::fs::read(&settings.font_path) {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to read font file {}: {}", settings.font_path, e);
            std::process::exit(1);
        }
    };
    match FontVec::try_from_vec(data) {
        Ok(font) => {
            info!("Label font loaded from {}.", settings.font_path);
            Arc::new(font)
        }
        Err(e) => {
            error!("Invalid font file {}: {}", settings.font_path, e);
            std::process::exit(1);
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry().branch(
        Update::filter_message()
            .enter_dialogue::<Message, InMemStorage<State>, State>()
            .branch(
                dptree::entry()
                    .filter_command::<Command>()
                    .endpoint(handle_command),
            )
            .branch(dptree::case![State::Idle].endpoint(handle_idle_message))
            .branch(
                dptree::case![State::AwaitingImageTask(artifact)].endpoint(handle_image_task),
            )
            .branch(
                dptree::case![State::AwaitingAudioTask(artifact)].endpoint(handle_audio_task),
            )
            .branch(dptree::case![State::AwaitingFeedback].endpoint(handle_feedback)),
    )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    dialogue: handlers::BotDialogue,
    settings: Arc<Settings>,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => handlers::start(bot, msg).await,
        Command::Help => handlers::help(bot, msg).await,
        Command::Donate => handlers::donate(bot, msg, settings).await,
        Command::Feedback => handlers::feedback_entry(bot, msg, dialogue).await,
        Command::Cancel => handlers::cancel(bot, msg, dialogue).await,
        Command::Send(args) => handlers::send_broadcast(bot, msg, settings, args).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_idle_message(
    bot: Bot,
    msg: Message,
    dialogue: handlers::BotDialogue,
    backend: Arc<HttpBackend>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = Box::pin(handlers::handle_intake(bot, msg, dialogue, backend)).await {
        error!("Intake error: {}", e);
    }
    respond(())
}

async fn handle_image_task(
    bot: Bot,
    msg: Message,
    artifact: PendingArtifact,
    dialogue: handlers::BotDialogue,
    backend: Arc<HttpBackend>,
    font: Arc<FontVec>,
) -> Result<(), teloxide::RequestError> {
    // A handler failure must not strand the session in a waiting state
    if let Err(e) = Box::pin(handlers::handle_image_task(
        bot,
        msg,
        artifact,
        dialogue.clone(),
        backend,
        font,
    ))
    .await
    {
        error!("Image task error: {}", e);
        reset_dialogue(&dialogue).await;
    }
    respond(())
}

async fn handle_audio_task(
    bot: Bot,
    msg: Message,
    artifact: PendingArtifact,
    dialogue: handlers::BotDialogue,
    backend: Arc<HttpBackend>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = Box::pin(handlers::handle_audio_task(
        bot,
        msg,
        artifact,
        dialogue.clone(),
        backend,
    ))
    .await
    {
        error!("Audio task error: {}", e);
        reset_dialogue(&dialogue).await;
    }
    respond(())
}

async fn handle_feedback(
    bot: Bot,
    msg: Message,
    dialogue: handlers::BotDialogue,
    settings: Arc<Settings>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_feedback(bot, msg, dialogue.clone(), settings).await {
        error!("Feedback error: {}", e);
        reset_dialogue(&dialogue).await;
    }
    respond(())
}

async fn reset_dialogue(dialogue: &handlers::BotDialogue) {
    if let Err(e) = dialogue.exit().await {
        error!("Failed to reset dialogue: {}", e);
    }
}
