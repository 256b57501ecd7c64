use anyhow::Result;
use std::io::Write as _;
use std::path::PathBuf;

use diffstudio::envconfig::{self, EnvConfig};
use diffstudio::format::{human_bytes, human_time};
use diffstudio::progress::Bar;
use diffstudio::downloader::Downloader;
use diffstudio::app::chat::{ChatOptions, LanguageModel};
use diffstudio::app::events::{self, Event, EventHandler};
use diffstudio::app::studio::Studio;
use diffstudio::core::{Device, GenerationRequest, Precision, Seed};
use diffstudio::infra::dev::{DevChatModule, DevChatTokenizer};
use diffstudio::infra::store::ArtifactStore;
use diffstudio::infra::DevPipelineBuilder;

#[derive(clap::Args)]
pub struct GenerateArgs {
    /// Prompt text
    pub prompt: String,
    #[arg(long, default_value = "")]
    pub negative_prompt: String,
    #[arg(long, default_value_t = 50)]
    pub steps: usize,
    #[arg(long, default_value_t = 7.5)]
    pub guidance_scale: f32,
    #[arg(long, default_value_t = 512)]
    pub height: usize,
    #[arg(long, default_value_t = 512)]
    pub width: usize,
    /// Negative for a random seed
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub seed: i64,
    #[arg(long, default_value = "fp16")]
    pub precision: String,
    #[arg(long, default_value_t = 1)]
    pub batch_size: usize,
    #[arg(long, default_value_t = 1)]
    pub batch_count: usize,
    #[arg(long)]
    pub repeatable_seeds: bool,
    #[arg(long, default_value = "ddim")]
    pub scheduler: String,
    #[arg(long, default_value = "stabilityai/stable-diffusion-2-1-base")]
    pub model: String,
    #[arg(long)]
    pub custom_weights: Option<PathBuf>,
    #[arg(long, default_value = "cpu")]
    pub device: String,
    #[arg(long, default_value_t = 0)]
    pub preview_interval: usize,
    #[arg(long)]
    pub save_metadata: bool,
    /// Override the output directory
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl GenerateArgs {
    fn into_request(self) -> Result<(GenerationRequest, Option<PathBuf>)> {
        let precision = Precision::parse(&self.precision)
            .ok_or_else(|| anyhow::anyhow!("unknown precision: {}", self.precision))?;
        let device = Device::parse(&self.device)
            .ok_or_else(|| anyhow::anyhow!("unknown device: {}", self.device))?;

        let request = GenerationRequest {
            prompt: self.prompt,
            negative_prompt: self.negative_prompt,
            steps: self.steps,
            guidance_scale: self.guidance_scale,
            height: self.height,
            width: self.width,
            seed: Seed::from_i64(self.seed),
            precision,
            batch_size: self.batch_size,
            batch_count: self.batch_count,
            repeatable_seeds: self.repeatable_seeds,
            scheduler: self.scheduler,
            model_id: self.model,
            custom_weights: self.custom_weights,
            max_length: 77,
            device,
            preview_interval: self.preview_interval,
            save_metadata: self.save_metadata,
        };
        Ok((request, self.output))
    }
}

/// Renders denoising progress from the event bus.
struct CliProgress {
    bar: parking_lot::Mutex<Option<Bar>>,
}

impl EventHandler for CliProgress {
    fn handle(&self, event: &Event) {
        match event {
            Event::BatchStarted { index, count, seed } => {
                println!("Batch {}/{} (seed {})", index + 1, count, seed);
            }
            Event::StepCompleted { step, total, .. } => {
                let mut bar = self.bar.lock();
                if bar.is_none() {
                    *bar = Some(Bar::new("Denoising", *total as u64, 0));
                }
                if let Some(bar) = bar.as_ref() {
                    bar.set(*step as u64 + 1);
                }
            }
            Event::BatchCompleted { .. } => {
                if let Some(bar) = self.bar.lock().take() {
                    bar.finish_and_clear();
                }
            }
            _ => {}
        }
    }

    fn name(&self) -> &str {
        "cli-progress"
    }
}

pub async fn generate(args: GenerateArgs) -> Result<()> {
    let config = EnvConfig::load();
    let (request, output_override) = args.into_request()?;
    let output_dir = output_override.unwrap_or(config.output_dir);

    let mut studio = Studio::new(Box::new(DevPipelineBuilder), &output_dir);

    let handler_id = events::subscribe(CliProgress {
        bar: parking_lot::Mutex::new(None),
    });

    let result = tokio::task::block_in_place(|| -> Result<_> {
        let mut stream = studio.generate(&request)?;
        for item in stream.by_ref() {
            item?;
        }
        Ok(stream.into_result())
    });
    events::unsubscribe(handler_id);
    let result = result?;

    println!("{}", result.log);
    println!(
        "\nWrote {} image(s) to {}",
        result.images.len(),
        output_dir.display()
    );
    Ok(())
}

fn chat_options() -> ChatOptions {
    ChatOptions::default()
}

fn stream_reply(model: &mut LanguageModel, prompt: &str) -> Result<()> {
    let mut printed = 0usize;
    model.chat(prompt, |decoded, done| {
        if decoded.len() > printed {
            print!("{}", &decoded[printed..]);
            let _ = std::io::stdout().flush();
            printed = decoded.len();
        }
        if done {
            println!();
        }
    })?;
    Ok(())
}

pub async fn chat(prompt: Vec<String>) -> Result<()> {
    let mut model = LanguageModel::new(
        Box::new(DevChatModule::new()),
        Box::new(DevChatTokenizer::new()),
        chat_options(),
    );

    let prompt = prompt.join(" ");
    if !prompt.is_empty() {
        return stream_reply(&mut model, &prompt);
    }

    println!(">>> Interactive chat, /exit to quit");
    let mut editor = rustyline::DefaultEditor::new()?;
    loop {
        match editor.readline(">>> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/exit" || line == "/quit" {
                    break;
                }
                if line == "/help" || line == "/?" {
                    println!("Commands:\n  /exit, /quit   Leave the chat\n  /?             Show this help");
                    continue;
                }
                editor.add_history_entry(line)?;
                if let Err(e) = stream_reply(&mut model, line) {
                    eprintln!("Error: {}", e);
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

pub async fn serve() -> Result<()> {
    let config = EnvConfig::load();
    let studio = Studio::new(Box::new(DevPipelineBuilder), &config.output_dir);
    let addr: std::net::SocketAddr = format!("{}:{}", config.host.host, config.host.port).parse()?;
    diffstudio::api::serve(studio, addr).await
}

pub async fn pull(name: &str) -> Result<()> {
    let config = EnvConfig::load();
    let store = ArtifactStore::new(&envconfig::artifacts_dir())?;
    let downloader = Downloader::new(&config.registry_url)?;

    let bar = parking_lot::Mutex::new(Option::<(String, Bar)>::None);
    downloader
        .pull(name, &store, |module, done, total| {
            let mut bar = bar.lock();
            let stale = bar.as_ref().map(|(m, _)| m != module).unwrap_or(true);
            if stale {
                if let Some((_, old)) = bar.take() {
                    old.finish_and_clear();
                }
                *bar = Some((module.to_string(), Bar::new(module, total.max(1), 0)));
            }
            if let Some((_, bar)) = bar.as_ref() {
                bar.set(done);
            }
        })
        .await?;
    if let Some((_, bar)) = bar.lock().take() {
        bar.finish_and_clear();
    }

    println!("Pulled {}", name);
    Ok(())
}

pub async fn list() -> Result<()> {
    let store = ArtifactStore::new(&envconfig::artifacts_dir())?;
    let artifacts = store.list_local()?;

    println!("{:<40} {:<10} {:<8} {:<8} {}", "NAME", "TAG", "SIZE", "MODULES", "MODIFIED");
    for a in artifacts {
        println!(
            "{:<40} {:<10} {:<8} {:<8} {}",
            a.name,
            a.tag,
            human_bytes(a.size),
            a.modules,
            human_time(a.modified_at, "unknown")
        );
    }
    Ok(())
}

pub async fn rm(name: &str) -> Result<()> {
    let store = ArtifactStore::new(&envconfig::artifacts_dir())?;
    store.delete(name)?;
    println!("Removed {}", name);
    Ok(())
}

pub async fn schedulers() -> Result<()> {
    for name in diffstudio::core::scheduler::names() {
        println!("{}", name);
    }
    Ok(())
}

pub async fn version() -> Result<()> {
    println!("diffstudio version {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
