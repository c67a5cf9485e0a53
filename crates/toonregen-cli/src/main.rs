use std::io::{self, BufRead, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use toonregen_contracts::chat::{parse_intent, Intent, SESSION_HELP_COMMANDS};
use toonregen_contracts::files::StageLadder;
use toonregen_contracts::providers::ProviderPolicy;
use toonregen_contracts::rounds::{
    CandidateId, CandidateStatus, ImageRef, ResultCandidate, SessionSummary,
};
use toonregen_contracts::styles::{RoundInputs, StyleRegistry};
use toonregen_engine::providers::default_provider_table;
use toonregen_engine::{
    CommitReport, CommitRequest, FileStore, LineageRecorder, LocalFileStore, RegenConfig,
    RegenSession, SessionOptions,
};
use tracing::debug;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "toonregen", version, about = "Webtoon panel regeneration")]
struct Cli {
    /// Debug-level logging unless TOONREGEN_LOG / RUST_LOG say otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the available styles and production stages.
    Styles,
    /// Generate one round, optionally re-roll and commit, then exit.
    Run(RunArgs),
    /// Interactive session over one source panel.
    Session(SessionArgs),
    /// List committed files of an owner.
    Files(FilesArgs),
    /// List files derived from a source file.
    Derived(DerivedArgs),
    /// Delete a committed file and its record.
    Remove(RemoveArgs),
}

#[derive(Debug, Args)]
struct SourceArgs {
    #[arg(long)]
    source: PathBuf,
    #[arg(long)]
    owner: String,
    /// Identifier of the source file; defaults to its path.
    #[arg(long)]
    source_id: Option<String>,
    /// Production stage of the source panel.
    #[arg(long, default_value = "sketch")]
    stage: String,
    #[arg(long = "ref")]
    refs: Vec<PathBuf>,
    /// Character sheet as NAME=PATH.
    #[arg(long = "sheet")]
    sheets: Vec<String>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    provider: Option<ProviderPolicy>,
    #[arg(long, default_value = "store")]
    store: PathBuf,
    /// Session directory for events, receipts and the summary.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long)]
    style: String,
    #[arg(long)]
    count: Option<usize>,
    /// 1-based candidate positions to re-roll once the round settles.
    #[arg(long = "reroll")]
    rerolls: Vec<usize>,
    #[arg(long = "select", num_args = 1.., conflicts_with = "select_all")]
    select: Vec<usize>,
    #[arg(long)]
    select_all: bool,
    #[arg(long)]
    target_stage: Option<String>,
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    count: Option<usize>,
}

#[derive(Debug, Args)]
struct FilesArgs {
    #[arg(long, default_value = "store")]
    store: PathBuf,
    #[arg(long)]
    owner: String,
}

#[derive(Debug, Args)]
struct DerivedArgs {
    #[arg(long, default_value = "store")]
    store: PathBuf,
    #[arg(long)]
    source_id: String,
}

#[derive(Debug, Args)]
struct RemoveArgs {
    #[arg(long, default_value = "store")]
    store: PathBuf,
    /// Storage path relative to the store root.
    #[arg(long)]
    path: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("toonregen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    match cli.command {
        Command::Styles => {
            print_styles(&mut io::stdout().lock())?;
            Ok(0)
        }
        Command::Run(args) => run_once(args),
        Command::Session(args) => run_session(args),
        Command::Files(args) => {
            let mut store = LocalFileStore::open(&args.store)?;
            for file in store.list_by_owner(&args.owner)? {
                println!("{}", serde_json::to_string(&file)?);
            }
            Ok(0)
        }
        Command::Derived(args) => {
            let store = LocalFileStore::open(&args.store)?;
            let lineage = store.lineage_log();
            for entry in LineageRecorder::derived_from(&lineage, &args.source_id)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
            Ok(0)
        }
        Command::Remove(args) => {
            let mut store = LocalFileStore::open(&args.store)?;
            match store.remove(&args.path)? {
                Some(file) => {
                    println!("Removed {} ({})", file.storage_path, file.id);
                    Ok(0)
                }
                None => {
                    eprintln!("No committed file at {}", args.path);
                    Ok(1)
                }
            }
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("TOONREGEN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(io::stderr)
        .try_init()
        .map_err(|err| anyhow!("failed to initialize logging: {err}"))
}

fn print_styles(out: &mut dyn Write) -> Result<()> {
    let registry = StyleRegistry::default();
    for style in registry.list() {
        writeln!(
            out,
            "{:<18} {:<28} reference={:?} default_count={} provider={}",
            style.key,
            style.label,
            style.requires_reference,
            style.default_count,
            style.preferred_provider.as_str(),
        )?;
    }
    let ladder = StageLadder::default();
    let stages: Vec<&str> = ladder.stages().iter().map(|stage| stage.id.as_str()).collect();
    writeln!(out, "stages: {}", stages.join(" -> "))?;
    Ok(())
}

fn open_session(args: &SourceArgs) -> Result<RegenSession> {
    let mut config = RegenConfig::from_env();
    config.dryrun |= args.dryrun;
    let providers = default_provider_table(&config);

    let mut source = ImageRef::from_path(&args.source);
    if let Some(id) = args.source_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        source = source.with_id(id);
    }
    let mut options = SessionOptions::new(source, &args.stage, &args.owner);
    options.session_dir = args.out.clone();
    options.seed = args.seed;
    debug!(dryrun = config.dryrun, max_in_flight = config.max_in_flight, "opening session");
    RegenSession::open(&config, providers, options)
}

/// Inputs a round is built from; the interactive loop edits these between rounds.
#[derive(Debug, Clone, Default)]
struct RoundDraft {
    style: Option<String>,
    count: Option<usize>,
    provider: Option<ProviderPolicy>,
    refs: Vec<ImageRef>,
    sheets: Vec<ImageRef>,
    prompt: Option<String>,
    target_stage: Option<String>,
}

impl RoundDraft {
    fn from_args(args: &SourceArgs) -> Self {
        Self {
            style: None,
            count: None,
            provider: args.provider,
            refs: args.refs.iter().map(ImageRef::from_path).collect(),
            sheets: args.sheets.iter().map(|raw| ImageRef::parse_labeled(raw)).collect(),
            prompt: args.prompt.clone(),
            target_stage: None,
        }
    }

    /// Without an explicit count the style's default applies.
    fn round_inputs(&self, styles: &StyleRegistry) -> RoundInputs {
        let requested_count = self.count.unwrap_or_else(|| {
            self.style
                .as_deref()
                .and_then(|key| styles.get(key.trim()))
                .map(|style| style.default_count)
                .unwrap_or(1)
        });
        RoundInputs {
            style_key: self.style.clone(),
            reference_images: self.refs.clone(),
            character_sheets: self.sheets.clone(),
            custom_prompt: self.prompt.clone(),
            requested_count,
            provider_override: self.provider,
        }
    }
}

fn run_once(args: RunArgs) -> Result<i32> {
    let mut session = open_session(&args.source)?;
    let mut draft = RoundDraft::from_args(&args.source);
    draft.style = Some(args.style.clone());
    draft.count = args.count;

    let mut out = io::stdout().lock();
    let round = session.dispatch_round(&draft.round_inputs(session.styles()))?;
    writeln!(
        out,
        "Round {} dispatched: {} candidate(s)",
        round.round_id,
        round.candidate_ids.len()
    )?;
    wait_for_results(&mut session, &mut out)?;

    if !args.rerolls.is_empty() {
        for position in &args.rerolls {
            let id = candidate_at(&session, *position)
                .ok_or_else(|| anyhow!("no candidate #{position}"))?;
            session.reroll(&id)?;
        }
        wait_for_results(&mut session, &mut out)?;
    }

    if args.select_all {
        session.select_all();
    }
    for position in &args.select {
        let id = candidate_at(&session, *position)
            .ok_or_else(|| anyhow!("no candidate #{position}"))?;
        session.toggle_select(&id, true);
    }

    let mut exit_code = 0;
    if !session.store().selected().is_empty() {
        let report = commit_selection(
            &mut session,
            &args.source,
            args.target_stage.as_deref(),
        )?;
        print_report(&report, &mut out)?;
        if !report.failures.is_empty() {
            exit_code = 1;
        }
    }

    let summary = session.close()?;
    print_summary(&summary, &mut out)?;
    Ok(exit_code)
}

fn run_session(args: SessionArgs) -> Result<i32> {
    let session = open_session(&args.source)?;
    let mut draft = RoundDraft::from_args(&args.source);
    draft.style = args.style.clone();
    draft.count = args.count;

    let stdin = io::stdin();
    let mut out = io::stdout();
    let summary = drive_session(session, draft, &args.source, stdin.lock(), &mut out)?;
    print_summary(&summary, &mut out)?;
    Ok(0)
}

fn commit_selection(
    session: &mut RegenSession,
    args: &SourceArgs,
    stage: Option<&str>,
) -> Result<CommitReport> {
    let mut files = LocalFileStore::open(&args.store)?;
    let mut lineage = files.lineage_log();
    let request = CommitRequest {
        stage: stage.map(str::to_string),
        description: args.description.clone(),
    };
    Ok(session.commit(&mut files, Some(&mut lineage), &request)?)
}

/// Reads commands until `/quit` or end of input, then closes the session.
fn drive_session<R: BufRead, W: Write>(
    mut session: RegenSession,
    mut draft: RoundDraft,
    args: &SourceArgs,
    mut input: R,
    out: &mut W,
) -> Result<SessionSummary> {
    let mut line = String::new();
    writeln!(out, "Session {} started. Type /help for commands.", session.session_id())?;

    loop {
        for id in session.poll() {
            if let Some(candidate) = session.store().get(&id) {
                let position = session.store().position_of(&id).unwrap_or(0);
                writeln!(out, "{}", describe_candidate(position + 1, candidate))?;
            }
        }
        write!(out, "> ")?;
        out.flush()?;

        line.clear();
        let read = match input.read_line(&mut line) {
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
        if intent.action == "quit" {
            break;
        }
        if let Err(err) = apply_intent(&mut session, &mut draft, args, &intent, out) {
            writeln!(out, "Error: {err:#}")?;
        }
    }

    session.close()
}

fn apply_intent<W: Write>(
    session: &mut RegenSession,
    draft: &mut RoundDraft,
    args: &SourceArgs,
    intent: &Intent,
    out: &mut W,
) -> Result<()> {
    report_invalid_tokens(intent, out)?;
    match intent.action.as_str() {
        "help" => {
            writeln!(out, "Commands: {}", SESSION_HELP_COMMANDS.join(" "))?;
            writeln!(out, "Plain text generates a round with that text as the prompt.")?;
        }
        "set_style" => match intent.arg_str("style") {
            Some(key) if session.styles().get(key).is_some() => {
                draft.style = Some(key.to_string());
                writeln!(out, "Style set to {key}")?;
            }
            Some(key) => writeln!(
                out,
                "Unknown style '{key}'. Available: {}",
                session.styles().keys().join(", ")
            )?,
            None => writeln!(out, "Usage: /style <key>")?,
        },
        "set_count" => match intent.arg_numbers("indices").first() {
            Some(count) => {
                draft.count = Some(*count);
                writeln!(out, "Count set to {count}")?;
            }
            None => writeln!(out, "Usage: /count <n>")?,
        },
        "set_provider" => {
            let policy: ProviderPolicy = intent
                .arg_str("provider")
                .unwrap_or("auto")
                .parse()
                .map_err(|err: String| anyhow!(err))?;
            draft.provider = Some(policy);
            writeln!(out, "Provider set to {}", policy.as_str())?;
        }
        "set_prompt" => {
            draft.prompt = intent.arg_str("prompt").map(str::to_string);
            match draft.prompt.as_deref() {
                Some(prompt) => writeln!(out, "Prompt set to: {prompt}")?,
                None => writeln!(out, "Prompt cleared; styles use their base prompt")?,
            }
        }
        "set_target_stage" => {
            draft.target_stage = intent.arg_str("stage").map(str::to_string);
            match draft.target_stage.as_deref() {
                Some(stage) => writeln!(out, "Commit stage set to {stage}")?,
                None => writeln!(out, "Commit stage follows the source stage")?,
            }
        }
        "add_references" => {
            let paths = intent.arg_strings("paths");
            draft.refs.extend(paths.iter().map(ImageRef::from_path));
            writeln!(out, "{} reference image(s) attached", draft.refs.len())?;
        }
        "add_character_sheets" => {
            let sheets = intent.arg_strings("paths");
            draft
                .sheets
                .extend(sheets.iter().map(|raw| ImageRef::parse_labeled(raw)));
            writeln!(out, "{} character sheet(s) attached", draft.sheets.len())?;
        }
        "clear_refs" => {
            draft.refs.clear();
            draft.sheets.clear();
            writeln!(out, "References and character sheets cleared")?;
        }
        "generate" => {
            let mut round_draft = draft.clone();
            if let Some(style) = intent.arg_str("style") {
                round_draft.style = Some(style.to_string());
            }
            if let Some(count) = intent.command_args.get("count").and_then(|v| v.as_u64()) {
                round_draft.count = Some(count as usize);
            }
            if let Some(prompt) = intent.prompt.as_deref() {
                round_draft.prompt = Some(prompt.to_string());
            }
            let round = session.dispatch_round(&round_draft.round_inputs(session.styles()))?;
            let first = round
                .candidate_ids
                .first()
                .and_then(|id| session.store().position_of(id))
                .unwrap_or(0);
            writeln!(
                out,
                "Round {} dispatched: candidates #{}-#{}",
                round.round_id,
                first + 1,
                first + round.candidate_ids.len()
            )?;
        }
        "reroll" => {
            for position in intent.arg_numbers("indices") {
                let Some(id) = candidate_at(session, position) else {
                    writeln!(out, "No candidate #{position}")?;
                    continue;
                };
                match session.reroll(&id) {
                    Ok(fresh) => {
                        let slot = session.store().position_of(&fresh).unwrap_or(0);
                        writeln!(out, "Re-rolling #{position} as #{}", slot + 1)?;
                    }
                    Err(err) => writeln!(out, "Cannot re-roll #{position}: {err}")?,
                }
            }
        }
        "select" | "deselect" => {
            let selected = intent.action == "select";
            for position in intent.arg_numbers("indices") {
                match candidate_at(session, position) {
                    Some(id) => {
                        session.toggle_select(&id, selected);
                    }
                    None => writeln!(out, "No candidate #{position}")?,
                }
            }
            writeln!(out, "{} selected", session.store().selected().len())?;
        }
        "select_all" => {
            session.select_all();
            writeln!(out, "{} selected", session.store().selected().len())?;
        }
        "deselect_all" => {
            session.deselect_all();
            writeln!(out, "Selection cleared")?;
        }
        "list" => {
            if session.store().is_empty() {
                writeln!(out, "No candidates yet")?;
            }
            for (position, candidate) in session.store().iter().enumerate() {
                writeln!(out, "{}", describe_candidate(position + 1, candidate))?;
            }
        }
        "wait" => wait_for_results(session, out)?,
        "commit" => {
            let stage = intent
                .arg_str("stage")
                .map(str::to_string)
                .or_else(|| draft.target_stage.clone());
            if session.store().selected().is_empty() {
                writeln!(out, "Nothing selected")?;
                return Ok(());
            }
            let report = commit_selection(session, args, stage.as_deref())?;
            print_report(&report, out)?;
        }
        "switch_source" => {
            let Some(path) = intent.arg_str("path") else {
                writeln!(out, "Usage: /source <path> [stage]")?;
                return Ok(());
            };
            session.switch_source(ImageRef::from_path(path), intent.arg_str("stage"));
            writeln!(
                out,
                "Source switched to {} ({}); previous candidates discarded",
                session.source().id,
                session.source_stage()
            )?;
        }
        "unknown" => {
            let command = intent.arg_str("command").unwrap_or_default();
            writeln!(out, "Unknown command /{command}. Type /help for commands.")?;
        }
        other => writeln!(out, "Unhandled action {other}")?,
    }
    Ok(())
}

/// Candidate at a 1-based position; 0 names nothing.
fn candidate_at(session: &RegenSession, position: usize) -> Option<CandidateId> {
    position
        .checked_sub(1)
        .and_then(|index| session.candidate_id_at(index))
}

fn report_invalid_tokens<W: Write>(intent: &Intent, out: &mut W) -> Result<()> {
    let invalid = intent.arg_strings("invalid");
    if !invalid.is_empty() {
        writeln!(out, "Ignoring invalid number(s): {}", invalid.join(", "))?;
    }
    Ok(())
}

fn wait_for_results<W: Write>(session: &mut RegenSession, out: &mut W) -> Result<()> {
    let mut settled = Vec::new();
    {
        let progress: &mut dyn FnMut(&ResultCandidate) =
            &mut |candidate| settled.push(candidate.id().clone());
        session.settle(Some(progress));
    }
    for id in settled {
        if let Some(candidate) = session.store().get(&id) {
            let position = session.store().position_of(&id).unwrap_or(0);
            writeln!(out, "{}", describe_candidate(position + 1, candidate))?;
        }
    }
    let tally = session.store().tally();
    writeln!(out, "{} ready, {} failed", tally.ready, tally.failed)?;
    Ok(())
}

fn describe_candidate(position: usize, candidate: &ResultCandidate) -> String {
    let marker = if candidate.is_selected() { "*" } else { " " };
    let mut line = format!(
        "{marker}#{position} [{}] {} round {}",
        candidate.status().as_str(),
        candidate.provider_used(),
        candidate.round_id()
    );
    match candidate.status() {
        CandidateStatus::Ready => {
            if let Some(payload) = candidate.payload() {
                line.push_str(&format!(" {} bytes {}", payload.bytes.len(), payload.mime_type));
            }
        }
        CandidateStatus::Failed => {
            line.push_str(&format!(" error: {}", candidate.error().unwrap_or("unknown")));
        }
        CandidateStatus::Placeholder => {}
    }
    if let Some(origin) = candidate.rerolled_from() {
        line.push_str(&format!(" (re-roll of {origin})"));
    }
    line
}

fn print_report<W: Write>(report: &CommitReport, out: &mut W) -> Result<()> {
    for committed in &report.committed {
        writeln!(
            out,
            "Committed {} -> {}",
            committed.candidate_id, committed.file.storage_path
        )?;
    }
    for failure in &report.failures {
        writeln!(out, "Failed: {failure}")?;
    }
    for warning in &report.warnings {
        writeln!(out, "Warning: {warning}")?;
    }
    writeln!(
        out,
        "{} of {} committed",
        report.success_count(),
        report.attempted()
    )?;
    Ok(())
}

fn print_summary<W: Write>(summary: &SessionSummary, out: &mut W) -> Result<()> {
    let payload = json!({
        "session_id": summary.session_id,
        "rounds": summary.total_rounds,
        "candidates": summary.total_candidates,
        "ready": summary.ready,
        "failed": summary.failed,
        "committed": summary.committed.len(),
    });
    writeln!(out, "{}", serde_json::to_string(&payload)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::path::Path;

    use clap::Parser;
    use toonregen_contracts::providers::ProviderPolicy;
    use toonregen_contracts::styles::StyleRegistry;
    use toonregen_engine::providers::render_placeholder_png;
    use toonregen_engine::{FileStore, LocalFileStore};

    use super::{
        drive_session, open_session, print_styles, Cli, Command, RoundDraft, SourceArgs,
    };

    fn source_args(dir: &Path) -> anyhow::Result<SourceArgs> {
        let source = dir.join("panel_07.png");
        std::fs::write(&source, render_placeholder_png("panel", 40, 60)?)?;
        Ok(SourceArgs {
            source,
            owner: "episode-3".to_string(),
            source_id: Some("file-panel-07".to_string()),
            stage: "sketch".to_string(),
            refs: Vec::new(),
            sheets: Vec::new(),
            prompt: None,
            provider: None,
            store: dir.join("store"),
            out: Some(dir.join("session")),
            dryrun: true,
            seed: Some(7),
            description: None,
        })
    }

    #[test]
    fn run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "toonregen",
            "run",
            "--source",
            "panel.png",
            "--owner",
            "ep-1",
            "--style",
            "flat-color",
            "--sheet",
            "Mina=mina.png",
            "--provider",
            "seedream",
            "--reroll",
            "2",
            "--select",
            "1",
            "3",
            "-v",
        ])
        .expect("parse");
        assert!(cli.verbose);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.style, "flat-color");
        assert_eq!(args.source.stage, "sketch");
        assert_eq!(args.source.provider, Some(ProviderPolicy::Seedream));
        assert_eq!(args.source.sheets, vec!["Mina=mina.png"]);
        assert_eq!(args.rerolls, vec![2]);
        assert_eq!(args.select, vec![1, 3]);
    }

    #[test]
    fn select_and_select_all_conflict() {
        let parsed = Cli::try_parse_from([
            "toonregen",
            "run",
            "--source",
            "p.png",
            "--owner",
            "o",
            "--style",
            "line-art",
            "--select",
            "1",
            "--select-all",
        ]);
        assert!(parsed.is_err());
        assert!(Cli::try_parse_from([
            "toonregen", "run", "--source", "p.png", "--owner", "o", "--style", "x",
            "--provider", "midjourney",
        ])
        .is_err());
    }

    #[test]
    fn missing_count_uses_style_default() {
        let registry = StyleRegistry::default();
        let mut draft = RoundDraft {
            style: Some("background-remove".to_string()),
            ..RoundDraft::default()
        };
        assert_eq!(draft.round_inputs(&registry).requested_count, 1);
        draft.style = Some("detail-enhance".to_string());
        assert_eq!(draft.round_inputs(&registry).requested_count, 2);
        draft.count = Some(3);
        assert_eq!(draft.round_inputs(&registry).requested_count, 3);
    }

    #[test]
    fn styles_listing_names_every_style() -> anyhow::Result<()> {
        let mut out = Vec::new();
        print_styles(&mut out)?;
        let text = String::from_utf8(out)?;
        for key in StyleRegistry::default().keys() {
            assert!(text.contains(&key), "missing {key}");
        }
        assert!(text.contains("sketch -> line-art"));
        Ok(())
    }

    #[test]
    fn scripted_session_generates_and_commits() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let args = source_args(temp.path())?;
        let session = open_session(&args)?;
        let script = "/help\n/generate line-art 2\n/wait\n/select 1 x\n/commit\n/bogus\n/quit\n";
        let mut out = Vec::new();

        let summary = drive_session(
            session,
            RoundDraft::from_args(&args),
            &args,
            Cursor::new(script),
            &mut out,
        )?;
        let text = String::from_utf8(out)?;

        assert!(text.contains("candidates #1-#2"), "{text}");
        assert!(text.contains("2 ready, 0 failed"), "{text}");
        assert!(text.contains("Ignoring invalid number(s): x"), "{text}");
        assert!(text.contains("1 of 1 committed"), "{text}");
        assert!(text.contains("Unknown command /bogus"), "{text}");
        assert_eq!(summary.total_rounds, 1);
        assert_eq!(summary.ready, 2);
        assert_eq!(summary.committed.len(), 1);

        let mut store = LocalFileStore::open(&args.store)?;
        let files = store.list_by_owner("episode-3")?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].stage_id, "line-art");
        assert!(files[0].file_name.starts_with("panel_07_"));
        assert!(temp.path().join("session/summary.json").exists());
        Ok(())
    }

    #[test]
    fn validation_errors_keep_the_loop_running() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let args = source_args(temp.path())?;
        let session = open_session(&args)?;
        let script = "/generate tone-reference\n/generate\n/commit final\n/list\n";
        let mut out = Vec::new();

        let summary = drive_session(
            session,
            RoundDraft::from_args(&args),
            &args,
            Cursor::new(script),
            &mut out,
        )?;
        let text = String::from_utf8(out)?;

        assert!(text.contains("requires a reference image"), "{text}");
        assert!(text.contains("no style selected"), "{text}");
        assert!(text.contains("Nothing selected"), "{text}");
        assert!(text.contains("No candidates yet"), "{text}");
        assert_eq!(summary.total_rounds, 0);
        Ok(())
    }

    #[test]
    fn position_zero_names_no_candidate() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let args = source_args(temp.path())?;
        let session = open_session(&args)?;
        let script = "/generate line-art 2\n/wait\n/select 0\n/reroll 0\n/list\n";
        let mut out = Vec::new();

        let summary = drive_session(
            session,
            RoundDraft::from_args(&args),
            &args,
            Cursor::new(script),
            &mut out,
        )?;
        let text = String::from_utf8(out)?;

        assert_eq!(text.matches("No candidate #0").count(), 2, "{text}");
        assert!(text.contains("0 selected"), "{text}");
        assert!(!text.contains("*#1"), "{text}");
        assert_eq!(summary.total_candidates, 2);
        Ok(())
    }
}
