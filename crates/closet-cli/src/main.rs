use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use closet_contracts::events::{ClosetEvent, EventWriter};
use closet_contracts::session::{parse_command, SESSION_HELP_COMMANDS};
use closet_contracts::storage::{LocalBlobStore, LocalOutfitStore};
use closet_contracts::wardrobe::{Category, ClothingItem, GeneratedOutfit};
use closet_engine::{
    ClosetConfig, GarmentInput, GenerationOrchestrator, GenerationOutcome, ImageSource,
    InspirationImage, RateLimitConfig, Wardrobe,
};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "closet", version, about = "Virtual closet outfit generator")]
struct Cli {
    /// Directory holding closet.json, the tables and the blobs.
    #[arg(long, global = true, default_value = ".closet")]
    data_dir: PathBuf,
    /// Event log path (defaults to <data-dir>/events.jsonl).
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a clothing photo.
    Add(AddArgs),
    /// List clothing items.
    Items(ItemsArgs),
    /// Delete a clothing item and its photo.
    Remove(IdArgs),
    /// Dress the mannequin in a top and a bottom.
    Outfit(OutfitArgs),
    /// Style the mannequin for an occasion.
    Nano(NanoArgs),
    /// Copy the outfit from an inspiration photo.
    Transfer(TransferArgs),
    /// List generated outfits, newest first.
    History,
    /// Like or unlike a generated outfit.
    Like(LikeArgs),
    /// Show the rate limiter state.
    Limits,
    /// Interactive session sharing one cache and rate limiter.
    Session,
}

#[derive(Debug, Args)]
struct AddArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    category: Category,
    path: PathBuf,
}

#[derive(Debug, Args)]
struct ItemsArgs {
    category: Option<Category>,
}

#[derive(Debug, Args)]
struct IdArgs {
    id: String,
}

#[derive(Debug, Args)]
struct OutfitArgs {
    #[arg(long, conflicts_with = "top_file", required_unless_present = "top_file")]
    top: Option<String>,
    #[arg(long)]
    top_file: Option<String>,
    #[arg(long, conflicts_with = "bottom_file", required_unless_present = "bottom_file")]
    bottom: Option<String>,
    #[arg(long)]
    bottom_file: Option<String>,
}

#[derive(Debug, Args)]
struct NanoArgs {
    #[arg(required = true, num_args = 1..)]
    occasion: Vec<String>,
}

#[derive(Debug, Args)]
struct TransferArgs {
    path: PathBuf,
}

#[derive(Debug, Args)]
struct LikeArgs {
    id: String,
    #[arg(long)]
    unlike: bool,
}

struct Closet {
    orchestrator: GenerationOrchestrator,
    wardrobe: Wardrobe,
}

fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("closet error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CLOSET_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let closet = open_closet(&cli.data_dir, cli.events.as_deref())?;
    match cli.command {
        Command::Add(args) => {
            let item = closet
                .wardrobe
                .add_item(&args.name, args.category, &args.path)?;
            println!("{}", format_item(&item));
            Ok(0)
        }
        Command::Items(args) => {
            let categories = match args.category {
                Some(category) => vec![category],
                None => vec![Category::Top, Category::Bottom],
            };
            for category in categories {
                for item in closet.wardrobe.list_items(category)? {
                    println!("{}", format_item(&item));
                }
            }
            Ok(0)
        }
        Command::Remove(args) => {
            let item = closet.wardrobe.delete_item(&args.id)?;
            println!("Removed {} ({})", item.name, item.id);
            Ok(0)
        }
        Command::Outfit(args) => {
            let top = garment_from_args(&closet.wardrobe, Category::Top, args.top, args.top_file)?;
            let bottom = garment_from_args(
                &closet.wardrobe,
                Category::Bottom,
                args.bottom,
                args.bottom_file,
            )?;
            Ok(report(closet.orchestrator.generate_outfit(&top, &bottom)))
        }
        Command::Nano(args) => {
            let occasion = args.occasion.join(" ");
            Ok(report(closet.orchestrator.generate_nano_outfit(&occasion)))
        }
        Command::Transfer(args) => {
            let inspiration = inspiration_from_path(&args.path)?;
            Ok(report(
                closet.orchestrator.generate_outfit_transfer(&inspiration),
            ))
        }
        Command::History => {
            for outfit in closet.wardrobe.list_outfits()? {
                println!("{}", format_outfit(&outfit));
            }
            Ok(0)
        }
        Command::Like(args) => {
            let outfit = closet.wardrobe.set_liked(&args.id, !args.unlike)?;
            println!("{}", format_outfit(&outfit));
            Ok(0)
        }
        Command::Limits => {
            let status = closet.orchestrator.rate_limit_status();
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(0)
        }
        Command::Session => {
            run_session(&closet)?;
            Ok(0)
        }
    }
}

fn open_closet(data_dir: &Path, events: Option<&Path>) -> Result<Closet> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("failed creating {}", data_dir.display()))?;
    let config = ClosetConfig::load(data_dir)?;
    let events_path = events
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir.join("events.jsonl"));
    let events = EventWriter::new(events_path, format!("session-{}", timestamp_millis()));
    let store = Arc::new(LocalOutfitStore::new(data_dir.join("db")));
    let blobs = Arc::new(LocalBlobStore::new(
        data_dir.join("blobs"),
        config.public_base.clone(),
    ));
    events.emit(
        ClosetEvent::SessionStarted,
        json_object(json!({
            "data_dir": data_dir.display().to_string(),
            "model": config.model,
            "api_key_present": config.api_key.is_some(),
        })),
    )?;
    tracing::debug!(data_dir = %data_dir.display(), model = %config.model, "closet opened");

    Ok(Closet {
        orchestrator: GenerationOrchestrator::new(
            &config,
            store.clone(),
            blobs.clone(),
            events.clone(),
        ),
        wardrobe: Wardrobe::new(store, blobs, events),
    })
}

fn run_session(closet: &Closet) -> Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();
    let mut top: Option<GarmentInput> = None;
    let mut bottom: Option<GarmentInput> = None;

    println!("Closet session started. Type /help for commands.");

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

        let command = parse_command(line.trim_end_matches(['\n', '\r']));
        let result: Result<()> = match command.action.as_str() {
            "noop" => Ok(()),
            "quit" => break,
            "help" => {
                println!("Commands: {}", SESSION_HELP_COMMANDS.join(" "));
                println!("Any other text styles the mannequin for that occasion.");
                Ok(())
            }
            "select_top" | "select_bottom" => {
                let category = if command.action == "select_top" {
                    Category::Top
                } else {
                    Category::Bottom
                };
                let id = command.arg_str("id").unwrap_or_default();
                closet.wardrobe.garment(id, category).map(|garment| {
                    println!("{category} set to {id}");
                    match category {
                        Category::Top => top = Some(garment),
                        Category::Bottom => bottom = Some(garment),
                    }
                })
            }
            "generate_outfit" => match (&top, &bottom) {
                (Some(top), Some(bottom)) => {
                    report(closet.orchestrator.generate_outfit(top, bottom));
                    Ok(())
                }
                _ => {
                    println!("/outfit requires /top <id> and /bottom <id> first");
                    Ok(())
                }
            },
            "nano" => {
                let occasion = command.arg_str("occasion").unwrap_or_default();
                report(closet.orchestrator.generate_nano_outfit(occasion));
                Ok(())
            }
            "transfer" => {
                let path = PathBuf::from(command.arg_str("path").unwrap_or_default());
                inspiration_from_path(&path).map(|inspiration| {
                    report(closet.orchestrator.generate_outfit_transfer(&inspiration));
                })
            }
            "list_tops" | "list_bottoms" => {
                let category = if command.action == "list_tops" {
                    Category::Top
                } else {
                    Category::Bottom
                };
                closet.wardrobe.list_items(category).map(|items| {
                    if items.is_empty() {
                        println!("No {category}s yet.");
                    }
                    for item in items {
                        println!("{}", format_item(&item));
                    }
                })
            }
            "remove_item" => {
                let id = command.arg_str("id").unwrap_or_default();
                closet.wardrobe.delete_item(id).map(|item| {
                    for selected in [&mut top, &mut bottom] {
                        if selected.as_ref().and_then(|garment| garment.id.as_deref())
                            == Some(item.id.as_str())
                        {
                            *selected = None;
                        }
                    }
                    println!("Removed {} ({})", item.name, item.id);
                })
            }
            "history" => closet.wardrobe.list_outfits().map(|outfits| {
                for outfit in outfits {
                    println!("{}", format_outfit(&outfit));
                }
            }),
            "like" | "unlike" => {
                let id = command.arg_str("id").unwrap_or_default();
                closet
                    .wardrobe
                    .set_liked(id, command.action == "like")
                    .map(|outfit| println!("{}", format_outfit(&outfit)))
            }
            "limits" => serde_json::to_string_pretty(&closet.orchestrator.rate_limit_status())
                .map(|text| println!("{text}"))
                .map_err(Into::into),
            "set_cooldown" => {
                let current = current_rate_limit(closet);
                let cooldown_ms = command.arg_u64("cooldown_ms").unwrap_or(current.cooldown_ms);
                closet.orchestrator.reconfigure_rate_limit(RateLimitConfig {
                    cooldown_ms,
                    ..current
                });
                println!("Cooldown set to {cooldown_ms} ms");
                Ok(())
            }
            "set_window" => {
                let current = current_rate_limit(closet);
                let max_calls = command
                    .arg_u64("max_calls")
                    .and_then(|value| u32::try_from(value).ok())
                    .unwrap_or(current.max_calls);
                let window_ms = command.arg_u64("window_ms").unwrap_or(current.window_ms);
                closet.orchestrator.reconfigure_rate_limit(RateLimitConfig {
                    max_calls,
                    window_ms,
                    ..current
                });
                println!("Window set to {max_calls} calls per {window_ms} ms");
                Ok(())
            }
            "invalid" => {
                println!(
                    "/{}: {}",
                    command.arg_str("command").unwrap_or("?"),
                    command.arg_str("reason").unwrap_or("invalid arguments")
                );
                Ok(())
            }
            _ => {
                println!(
                    "Unknown command /{}. Type /help for commands.",
                    command.arg_str("command").unwrap_or("?")
                );
                Ok(())
            }
        };
        if let Err(err) = result {
            println!("Error: {err:#}");
        }
    }
    Ok(())
}

fn current_rate_limit(closet: &Closet) -> RateLimitConfig {
    let status = closet.orchestrator.rate_limit_status();
    RateLimitConfig {
        cooldown_ms: status.cooldown_ms,
        max_calls: status.max_calls,
        window_ms: status.window_ms,
    }
}

/// Prints the outcome and maps it to an exit code.
fn report(outcome: GenerationOutcome) -> i32 {
    match outcome {
        GenerationOutcome::Ready(image) => {
            println!("{}", image.url);
            if image.is_composite {
                eprintln!("note: remote generation failed; showing a local composite");
            }
            eprintln!("source: {} ({})", image.tier.as_str(), image.key);
            0
        }
        GenerationOutcome::Busy => {
            eprintln!("a generation is already in progress");
            2
        }
        GenerationOutcome::Failed(err) => {
            eprintln!("generation failed: {err}");
            1
        }
    }
}

fn garment_from_args(
    wardrobe: &Wardrobe,
    category: Category,
    id: Option<String>,
    file: Option<String>,
) -> Result<GarmentInput> {
    match (id, file) {
        (Some(id), _) => wardrobe.garment(&id, category),
        (None, Some(file)) => Ok(GarmentInput {
            id: None,
            image: ImageSource::parse(&file),
        }),
        (None, None) => bail!("a {category} id or file is required"),
    }
}

fn inspiration_from_path(path: &Path) -> Result<InspirationImage> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no file name", path.display()))?;
    Ok(InspirationImage {
        file_name,
        bytes,
        mime_type: String::new(),
    })
}

fn format_item(item: &ClothingItem) -> String {
    format!(
        "{}  {:<6}  {}  {}",
        item.id,
        item.category.as_str(),
        item.name,
        item.image_url
    )
}

fn format_outfit(outfit: &GeneratedOutfit) -> String {
    format!(
        "{}  {:<8}  {}  {}",
        outfit.id,
        outfit.generator_source.as_str(),
        if outfit.is_liked { "liked" } else { "-" },
        outfit.generated_image_url
    )
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

fn json_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use clap::Parser;
    use closet_contracts::wardrobe::Category;
    use closet_engine::ImageSource;

    use super::{garment_from_args, inspiration_from_path, open_closet, Cli, Command};

    #[test]
    fn outfit_accepts_ids_or_files() {
        let cli = Cli::try_parse_from([
            "closet",
            "outfit",
            "--top",
            "t1",
            "--bottom-file",
            "jeans.png",
        ])
        .unwrap();
        match cli.command {
            Command::Outfit(args) => {
                assert_eq!(args.top.as_deref(), Some("t1"));
                assert_eq!(args.bottom_file.as_deref(), Some("jeans.png"));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.data_dir, PathBuf::from(".closet"));

        assert!(Cli::try_parse_from(["closet", "outfit", "--top", "t1"]).is_err());
        assert!(Cli::try_parse_from([
            "closet", "outfit", "--top", "t1", "--top-file", "a.png", "--bottom", "b1"
        ])
        .is_err());
    }

    #[test]
    fn add_parses_category_aliases() {
        let cli = Cli::try_parse_from([
            "closet",
            "--data-dir",
            "/tmp/closet",
            "add",
            "--name",
            "Jeans",
            "--category",
            "bottoms",
            "jeans.png",
        ])
        .unwrap();
        match cli.command {
            Command::Add(args) => assert_eq!(args.category, Category::Bottom),
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from([
            "closet", "add", "--name", "x", "--category", "hat", "x.png"
        ])
        .is_err());
    }

    #[test]
    fn garment_from_file_is_anonymous() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let closet = open_closet(temp.path(), None)?;
        let garment = garment_from_args(
            &closet.wardrobe,
            Category::Top,
            None,
            Some("https://cdn.test/shirt.png".to_string()),
        )?;
        assert_eq!(garment.id, None);
        assert_eq!(
            garment.image,
            ImageSource::Url("https://cdn.test/shirt.png".to_string())
        );
        assert!(garment_from_args(&closet.wardrobe, Category::Top, Some("missing".into()), None)
            .is_err());
        Ok(())
    }

    #[test]
    fn inspiration_keeps_file_name_and_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("street_look.jpg");
        fs::write(&path, b"jpeg")?;
        let inspiration = inspiration_from_path(&path)?;
        assert_eq!(inspiration.file_name, "street_look.jpg");
        assert_eq!(inspiration.bytes, b"jpeg");
        Ok(())
    }

    #[test]
    fn open_closet_logs_session_start() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = temp.path().join("log/events.jsonl");
        open_closet(temp.path(), Some(events.as_path()))?;
        let raw = fs::read_to_string(&events)?;
        assert!(raw.contains("\"type\":\"session_started\""));
        Ok(())
    }
}
