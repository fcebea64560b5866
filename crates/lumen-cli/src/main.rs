use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use lumen_contracts::chat::{
    parse_intent, ChatSession, Intent, CHAT_GREETING, CHAT_HELP_COMMANDS, STUDIO_HELP_COMMANDS,
};
use lumen_contracts::events::EventWriter;
use lumen_contracts::features::QUICK_TAGS;
use lumen_contracts::{AcceptClass, GenerationMode, GenerationResult, MediaRef, Stage, Studio};
use lumen_engine::{new_session_id, CancelFlag, EngineConfig, StudioEngine, VideoPollPolicy};

const POLL_TIMEOUT_HELP: &str = "Give up on a video after this many seconds. \
Without it (or with 0) a video wait only ends when the service finishes \
or the process is interrupted";

const ANIMATE_ABOUT: &str = "Turn a photo into a short video. \
The video job is polled until the service reports it done; \
pass --poll-timeout to bound the wait.";

#[derive(Debug, Parser)]
#[command(name = "lumen-rs", version, about = "Lumen visual design assistant")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Edit a photo from a text instruction")]
    Edit(GenerateArgs),
    #[command(about = "Turn a photo into a short video", long_about = ANIMATE_ABOUT)]
    Animate(GenerateArgs),
    #[command(about = "Ask a question about a video clip")]
    Analyze(GenerateArgs),
    #[command(about = "Draft an edit prompt for a photo or video")]
    Suggest(InputArgs),
    #[command(about = "List editable design features of a photo or video")]
    Scan(InputArgs),
    #[command(about = "Interactive upload, describe, generate and result session")]
    Studio(StudioArgs),
    #[command(about = "Interactive design chat")]
    Chat(ChatArgs),
}

#[derive(Debug, Args)]
struct EngineArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    video_model: Option<String>,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long, help = "Seconds between video status checks")]
    poll_interval: Option<f64>,
    #[arg(long, help = POLL_TIMEOUT_HELP)]
    poll_timeout: Option<f64>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    prompt: String,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct InputArgs {
    #[arg(long)]
    input: PathBuf,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct StudioArgs {
    #[arg(long, help = "Restrict uploads to images")]
    images_only: bool,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    engine: EngineArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("lumen-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Edit(args) => run_generate(args, GenerationMode::ImageEdit),
        Command::Animate(args) => run_generate(args, GenerationMode::VideoSynthesis),
        Command::Analyze(args) => run_generate(args, GenerationMode::VideoAnalysis),
        Command::Suggest(args) => run_suggest(args),
        Command::Scan(args) => run_scan(args),
        Command::Studio(args) => {
            run_studio(args)?;
            Ok(0)
        }
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
    }
}

fn engine_config(args: &EngineArgs, base: EngineConfig) -> Result<EngineConfig> {
    let mut config = base;
    if let Some(provider) = non_empty(args.provider.as_deref()) {
        config.provider = provider.to_ascii_lowercase();
    }
    if let Some(api_base) = non_empty(args.api_base.as_deref()) {
        config.api_base = api_base.trim_end_matches('/').to_string();
    }
    if let Some(model) = non_empty(args.image_model.as_deref()) {
        config.image_model = Some(model.to_string());
    }
    if let Some(model) = non_empty(args.video_model.as_deref()) {
        config.video_model = Some(model.to_string());
    }
    if let Some(model) = non_empty(args.text_model.as_deref()) {
        config.text_model = Some(model.to_string());
    }
    if let Some(seconds) = args.poll_interval {
        let interval = seconds_arg("--poll-interval", seconds)?;
        if interval.is_zero() {
            bail!("--poll-interval must be greater than zero");
        }
        config.poll.interval = interval;
    }
    if let Some(seconds) = args.poll_timeout {
        let timeout = seconds_arg("--poll-timeout", seconds)?;
        config.poll.timeout = (!timeout.is_zero()).then_some(timeout);
    }
    Ok(config)
}

fn seconds_arg(flag: &str, seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .with_context(|| format!("{flag} expects a non-negative number of seconds"))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn open_engine(args: &EngineArgs) -> Result<StudioEngine> {
    let config = engine_config(args, EngineConfig::from_env())?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let events = EventWriter::new(events_path, new_session_id());
    let engine = StudioEngine::new(config, events)?;
    for reason in &engine.models().fallback_reasons {
        eprintln!("note: {reason}");
    }
    Ok(engine)
}

fn open_studio(engine: &StudioEngine, input: &Path) -> Result<Studio> {
    let mut studio = Studio::default();
    engine
        .upload_path(&mut studio, input)
        .with_context(|| format!("failed to upload {}", input.display()))?;
    Ok(studio)
}

fn run_generate(args: GenerateArgs, mode: GenerationMode) -> Result<i32> {
    let engine = open_engine(&args.engine)?;
    let mut studio = open_studio(&engine, &args.input)?;
    studio.set_prompt(args.prompt.as_str());
    println!("{mode} with {}...", engine.provider());
    if let Some(note) = video_wait_note(mode, engine.poll_policy()) {
        println!("{note}");
    }
    engine.generate(&mut studio, mode, &CancelFlag::new())?;
    if let Some(result) = studio.result() {
        println!("{}", describe_result(result));
    }
    let saved = engine.save_result(&studio, &args.engine.out)?;
    println!("Saved {}", saved.display());
    Ok(0)
}

fn run_suggest(args: InputArgs) -> Result<i32> {
    let engine = open_engine(&args.engine)?;
    let mut studio = open_studio(&engine, &args.input)?;
    engine.suggest_prompt(&mut studio)?;
    println!("{}", studio.prompt());
    Ok(0)
}

fn run_scan(args: InputArgs) -> Result<i32> {
    let engine = open_engine(&args.engine)?;
    let mut studio = open_studio(&engine, &args.input)?;
    engine.scan_features(&mut studio)?;
    if studio.features().is_empty() {
        println!("No features found.");
        return Ok(0);
    }
    print_numbered(studio.features());
    Ok(0)
}

fn run_studio(args: StudioArgs) -> Result<()> {
    let engine = open_engine(&args.engine)?;
    let accept = if args.images_only {
        AcceptClass::Images
    } else {
        AcceptClass::ImagesAndVideos
    };
    let mut studio = Studio::new(accept);

    println!(
        "Lumen studio started. Upload {} with /upload <path>. Type /help for commands.",
        accept.describe()
    );
    repl(|intent| {
        let outcome = studio_command(&engine, &mut studio, &args.engine.out, &intent);
        if let Err(err) = &outcome {
            println!("Error: {err:#}");
        }
        Ok(outcome.unwrap_or(Flow::Continue))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

fn studio_command(
    engine: &StudioEngine,
    studio: &mut Studio,
    out_dir: &Path,
    intent: &Intent,
) -> Result<Flow> {
    match intent.action.as_str() {
        "help" => println!("Commands: {}", STUDIO_HELP_COMMANDS.join(" ")),
        "quit" => return Ok(Flow::Quit),
        "status" => println!("{}", studio_status(studio)),
        "upload" => {
            let Some(path) = intent.arg_str("path") else {
                bail!("/upload requires a path");
            };
            engine.upload_path(studio, Path::new(path))?;
            println!("{}", studio_status(studio));
        }
        "set_prompt" => {
            studio.set_prompt(intent.arg_str("text").unwrap_or_default());
            println!("Prompt: {}", studio.prompt());
        }
        "message" => {
            studio.set_prompt(intent.text.as_deref().unwrap_or_default().trim());
            println!("Prompt: {}", studio.prompt());
        }
        "insert_tag" => {
            let Some(tag) = intent.arg_str("text") else {
                bail!("/tag requires a phrase; /tags lists suggestions");
            };
            studio.insert_tag(tag);
            println!("Prompt: {}", studio.prompt());
        }
        "list_tags" => print_numbered(QUICK_TAGS),
        "append_feature" => {
            let label = intent
                .arg_f64("value")
                .and_then(|value| pick_numbered(studio.features(), value))
                .map(str::to_string);
            let Some(label) = label else {
                bail!("/feature expects a number from the last /scan");
            };
            studio.append_feature(&label);
            println!("Prompt: {}", studio.prompt());
        }
        "suggest" => {
            println!("Drafting a prompt...");
            engine.suggest_prompt(studio)?;
            println!("Prompt: {}", studio.prompt());
        }
        "scan" => {
            println!("Scanning for features...");
            engine.scan_features(studio)?;
            if studio.features().is_empty() {
                println!("No features found.");
            } else {
                print_numbered(studio.features());
            }
        }
        "generate" => {
            let Some(mode) = studio.default_mode() else {
                bail!("Upload a photo or video first.");
            };
            generate(engine, studio, mode)?;
        }
        "edit" => generate(engine, studio, GenerationMode::ImageEdit)?,
        "animate" => generate(engine, studio, GenerationMode::VideoSynthesis)?,
        "analyze" => generate(engine, studio, GenerationMode::VideoAnalysis)?,
        "set_slider" => {
            let Some(value) = intent.arg_f64("value") else {
                bail!("/slider expects a percentage");
            };
            if !matches!(studio.result(), Some(GenerationResult::EditedImage(_))) {
                bail!("The comparison slider is only shown for edited images.");
            }
            studio.slider_mut().set(value);
            println!("Comparison at {:.0}% edited", studio.slider().position());
        }
        "save" => {
            let target = intent.arg_str("path").map(Path::new).unwrap_or(out_dir);
            let saved = engine.save_result(studio, target)?;
            println!("Saved {}", saved.display());
        }
        "refine" => {
            studio.refine()?;
            println!("Continuing from the edited image. Describe the next change.");
        }
        "reset" => {
            studio.reset();
            println!("{}", studio_status(studio));
        }
        "unknown" => {
            let command = intent.arg_str("command").unwrap_or_default();
            println!("Unknown command /{command}. Type /help for commands.");
        }
        _ => println!("/{} is only available in chat.", intent.action),
    }
    Ok(Flow::Continue)
}

fn generate(engine: &StudioEngine, studio: &mut Studio, mode: GenerationMode) -> Result<()> {
    println!("{mode} in progress...");
    if let Some(note) = video_wait_note(mode, engine.poll_policy()) {
        println!("{note}");
    }
    engine.generate(studio, mode, &CancelFlag::new())?;
    if let Some(result) = studio.result() {
        println!("{}", describe_result(result));
    }
    println!("Use /save, /refine or /reset.");
    Ok(())
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let engine = open_engine(&args.engine)?;
    let mut session = ChatSession::new();

    println!("{CHAT_GREETING}");
    println!("Type /help for commands.");
    repl(|intent| {
        let outcome = chat_command(&engine, &mut session, &intent);
        if let Err(err) = &outcome {
            println!("Error: {err:#}");
        }
        Ok(outcome.unwrap_or(Flow::Continue))
    })
}

fn chat_command(engine: &StudioEngine, session: &mut ChatSession, intent: &Intent) -> Result<Flow> {
    match intent.action.as_str() {
        "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
        "quit" => return Ok(Flow::Quit),
        "attach" => {
            let Some(path) = intent.arg_str("path") else {
                bail!("/attach requires a path");
            };
            let media = MediaRef::from_path(Path::new(path))?;
            if !session.attach(media) {
                bail!("Only images can be attached to a chat message.");
            }
            println!("Attached {path}");
        }
        "detach" => match session.detach() {
            Some(_) => println!("Attachment removed."),
            None => println!("Nothing attached."),
        },
        "clear" => {
            session.clear();
            println!("{CHAT_GREETING}");
        }
        "history" => {
            for message in session.transcript().messages() {
                let marker = if message.attachment.is_some() {
                    " [image]"
                } else {
                    ""
                };
                println!("{}{marker}: {}", message.role.as_str(), message.text);
            }
        }
        "message" => {
            let text = intent.text.as_deref().unwrap_or_default();
            match engine.chat(session, text)? {
                Some(reply) => println!("{}", reply.text),
                None => println!("Type a message or attach an image first."),
            }
        }
        "unknown" => {
            let command = intent.arg_str("command").unwrap_or_default();
            println!("Unknown command /{command}. Type /help for commands.");
        }
        _ => println!("/{} is only available in the studio.", intent.action),
    }
    Ok(Flow::Continue)
}

fn repl(mut handle: impl FnMut(Intent) -> Result<Flow>) -> Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if intent.action == "noop" {
            continue;
        }
        if handle(intent)? == Flow::Quit {
            break;
        }
    }
    Ok(())
}

fn video_wait_note(mode: GenerationMode, policy: &VideoPollPolicy) -> Option<String> {
    if mode != GenerationMode::VideoSynthesis {
        return None;
    }
    Some(match policy.timeout {
        Some(timeout) => format!(
            "Waiting up to {:.1}s for the video.",
            timeout.as_secs_f64()
        ),
        None => "Waiting for the video with no time limit; \
restart with --poll-timeout <secs> to bound the wait."
            .to_string(),
    })
}

fn studio_status(studio: &Studio) -> String {
    let mut status = format!("Step: {}", studio.stage());
    if let Some(source) = studio.source() {
        status.push_str(&format!(
            " | source: {} ({} bytes)",
            source.content_type(),
            source.len()
        ));
    }
    if studio.stage() == Stage::Describe {
        if let Some(mode) = studio.default_mode() {
            status.push_str(&format!(" | default: {mode}"));
        }
    }
    if !studio.prompt().is_empty() {
        status.push_str(&format!(" | prompt: {}", studio.prompt()));
    }
    if let Some(error) = studio.error() {
        status.push_str(&format!(" | error: {error}"));
    }
    status
}

fn describe_result(result: &GenerationResult) -> String {
    match result {
        GenerationResult::EditedImage(media) => format!(
            "Edited image ready ({}, {} bytes).",
            media.content_type(),
            media.len()
        ),
        GenerationResult::Video(media) => format!(
            "Video ready ({}, {} bytes).",
            media.content_type(),
            media.len()
        ),
        GenerationResult::Analysis(text) => format!("Analysis:\n{text}"),
    }
}

fn pick_numbered<S: AsRef<str>>(items: &[S], value: f64) -> Option<&str> {
    if !value.is_finite() || value < 1.0 || value.fract() != 0.0 {
        return None;
    }
    items.get(value as usize - 1).map(AsRef::as_ref)
}

fn print_numbered<S: AsRef<str>>(items: &[S]) {
    for (index, item) in items.iter().enumerate() {
        println!("  {}. {}", index + 1, item.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn engine_args(out: &Path) -> EngineArgs {
        EngineArgs {
            out: out.to_path_buf(),
            events: None,
            provider: Some("dryrun".to_string()),
            api_base: None,
            image_model: None,
            video_model: None,
            text_model: None,
            poll_interval: None,
            poll_timeout: None,
        }
    }

    fn dryrun_engine(out: &Path) -> Result<StudioEngine> {
        let config = engine_config(&engine_args(out), EngineConfig::default())?;
        StudioEngine::new(config, EventWriter::disabled("test"))
    }

    #[test]
    fn flags_override_environment_config() -> Result<()> {
        let mut args = engine_args(Path::new("out"));
        args.api_base = Some("https://proxy.test/v1beta/".to_string());
        args.image_model = Some("  ".to_string());
        args.poll_interval = Some(2.0);
        args.poll_timeout = Some(0.0);
        let base = EngineConfig {
            image_model: Some("gemini-2.5-flash-image".to_string()),
            poll: lumen_engine::VideoPollPolicy {
                interval: Duration::from_secs(10),
                timeout: Some(Duration::from_secs(60)),
            },
            ..EngineConfig::default()
        };

        let config = engine_config(&args, base)?;
        assert_eq!(config.provider, "dryrun");
        assert_eq!(config.api_base, "https://proxy.test/v1beta");
        assert_eq!(config.image_model.as_deref(), Some("gemini-2.5-flash-image"));
        assert_eq!(config.poll.interval, Duration::from_secs(2));
        assert_eq!(config.poll.timeout, None);
        Ok(())
    }

    #[test]
    fn invalid_poll_flags_are_rejected() {
        let mut args = engine_args(Path::new("out"));
        args.poll_interval = Some(0.0);
        assert!(engine_config(&args, EngineConfig::default()).is_err());

        let mut args = engine_args(Path::new("out"));
        args.poll_timeout = Some(-1.0);
        assert!(engine_config(&args, EngineConfig::default()).is_err());
    }

    #[test]
    fn numbered_picks_are_one_based() {
        let features = vec!["Oak floor".to_string(), "Brass lamp".to_string()];
        assert_eq!(pick_numbered(&features, 1.0), Some("Oak floor"));
        assert_eq!(pick_numbered(&features, 2.0), Some("Brass lamp"));
        assert_eq!(pick_numbered(&features, 0.0), None);
        assert_eq!(pick_numbered(&features, 3.0), None);
        assert_eq!(pick_numbered(&features, 1.5), None);
        assert_eq!(pick_numbered(QUICK_TAGS, 2.0), Some("warm lighting"));
    }

    #[test]
    fn studio_commands_drive_the_flow() -> Result<()> {
        let temp = tempfile::TempDir::new()?;
        let engine = dryrun_engine(temp.path())?;
        let mut studio = Studio::default();
        studio.accept_upload(MediaRef::new("video/mp4", vec![0, 0, 0, 24]))?;

        let flow = studio_command(
            &engine,
            &mut studio,
            temp.path(),
            &parse_intent("Which plants are in this clip?"),
        )?;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(studio.prompt(), "Which plants are in this clip?");

        studio_command(&engine, &mut studio, temp.path(), &parse_intent("/generate"))?;
        assert_eq!(studio.stage(), Stage::Result);
        assert!(studio_command(
            &engine,
            &mut studio,
            temp.path(),
            &parse_intent("/slider 20")
        )
        .is_err());

        studio_command(&engine, &mut studio, temp.path(), &parse_intent("/save"))?;
        let saved: Vec<_> = std::fs::read_dir(temp.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert!(saved.iter().any(|name| name.starts_with("lumen-analysis-")));

        let flow = studio_command(&engine, &mut studio, temp.path(), &parse_intent("/quit"))?;
        assert_eq!(flow, Flow::Quit);
        Ok(())
    }

    #[test]
    fn chat_attach_refuses_non_images() -> Result<()> {
        let temp = tempfile::TempDir::new()?;
        let clip = temp.path().join("walkthrough.mp4");
        std::fs::write(&clip, [0u8, 0, 0, 24])?;
        let engine = dryrun_engine(temp.path())?;
        let mut session = ChatSession::new();

        let command = format!("/attach \"{}\"", clip.display());
        assert!(chat_command(&engine, &mut session, &parse_intent(&command)).is_err());
        assert!(session.pending_attachment().is_none());

        chat_command(&engine, &mut session, &parse_intent("Ideas for a small patio?"))?;
        assert_eq!(session.transcript().len(), 2);
        Ok(())
    }

    #[test]
    fn video_wait_is_announced_with_its_bound() {
        let unbounded = VideoPollPolicy::default();
        let note = video_wait_note(GenerationMode::VideoSynthesis, &unbounded).unwrap_or_default();
        assert!(note.contains("--poll-timeout"));
        assert_eq!(video_wait_note(GenerationMode::ImageEdit, &unbounded), None);

        let bounded = VideoPollPolicy {
            interval: Duration::from_secs(10),
            timeout: Some(Duration::from_millis(1500)),
        };
        assert_eq!(
            video_wait_note(GenerationMode::VideoSynthesis, &bounded).as_deref(),
            Some("Waiting up to 1.5s for the video.")
        );
    }

    #[test]
    fn animate_help_names_the_only_wait_bound() {
        let mut cli = Cli::command();
        let help = cli
            .find_subcommand_mut("animate")
            .map(|animate| animate.render_long_help().to_string())
            .unwrap_or_default();
        assert!(help.contains("pass --poll-timeout to bound the wait"));
        assert!(help.contains("process is interrupted"));
    }

    #[test]
    fn status_mentions_stage_and_error() -> Result<()> {
        let mut studio = Studio::default();
        assert_eq!(studio_status(&studio), "Step: upload");
        studio.accept_upload(MediaRef::new("image/png", vec![1, 2, 3]))?;
        studio.set_prompt("add a pool");
        let status = studio_status(&studio);
        assert!(status.starts_with("Step: describe | source: image/png (3 bytes)"));
        assert!(status.contains("prompt: add a pool"));
        Ok(())
    }
}
