use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::app::events::{self, Event};
use crate::app::output::save_output_img;
use crate::core::denoise::{
    initial_latent, CancelToken, DenoiseConfig, DenoiseLoop, DenoiseState, Preview, StepObserver,
    StepResult,
};
use crate::core::scheduler::{self, NoiseScheduleConfig, Scheduler};
use crate::core::{
    ConfigError, GenerationRequest, ImageData, Pipeline, PipelineBuilder, PipelineConfig, Result,
    Seed, TextEmbeddings,
};
use crate::infra::weights::inspect_checkpoint;

/// One per-batch progress tuple yielded by the stream.
#[derive(Debug, Clone)]
pub struct GenerationUpdate {
    /// Every image generated so far, across batches.
    pub images: Vec<ImageData>,
    pub log: String,
    pub status: String,
    pub seeds: Vec<u32>,
    pub saved: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub images: Vec<ImageData>,
    pub log: String,
    pub total_time: Duration,
    pub seeds: Vec<u32>,
}

struct CachedPipeline {
    config: PipelineConfig,
    pipeline: Pipeline,
}

/// The generation context: owns the pipeline builder, the compiled-pipeline
/// cache and the output location. Replaces the process-wide globals the
/// original carried; one `Studio` serves one request at a time.
pub struct Studio {
    builder: Box<dyn PipelineBuilder>,
    cached: Option<CachedPipeline>,
    output_dir: PathBuf,
    schedule: NoiseScheduleConfig,
}

impl Studio {
    pub fn new(builder: Box<dyn PipelineBuilder>, output_dir: &Path) -> Self {
        Self {
            builder,
            cached: None,
            output_dir: output_dir.to_path_buf(),
            schedule: NoiseScheduleConfig::default(),
        }
    }

    pub fn with_schedule(mut self, schedule: NoiseScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Validate the request, make sure a matching pipeline is compiled, and
    /// hand back the lazy per-batch stream. All configuration errors surface
    /// here, before any compute.
    pub fn generate(&mut self, request: &GenerationRequest) -> Result<GenerationStream<'_>> {
        request.validate()?;

        if let Some(weights) = &request.custom_weights {
            let info = inspect_checkpoint(weights)?;
            tracing::info!(
                "using custom weights {} ({} tensors)",
                weights.display(),
                info.tensor_count
            );
        }

        let mut sched = scheduler::create(&request.scheduler, &self.schedule)
            .ok_or_else(|| ConfigError::UnknownScheduler(request.scheduler.clone()))?;
        sched.set_timesteps(request.steps);

        let config = PipelineConfig::from_request(request);
        let output_dir = self.output_dir.clone();
        let pipeline = self.ensure_pipeline(&config)?;

        let embeddings = pipeline.text_encoder.encode(
            &request.prompt,
            &request.negative_prompt,
            request.max_length,
        )?;

        Ok(GenerationStream {
            pipeline,
            scheduler: sched,
            embeddings,
            request: request.clone(),
            output_dir,
            cancel: CancelToken::new(),
            preview_hook: None,
            images: Vec::new(),
            seeds: Vec::new(),
            saved: Vec::new(),
            log: String::new(),
            batch: 0,
            failed: false,
            started: Instant::now(),
        })
    }

    fn ensure_pipeline(&mut self, config: &PipelineConfig) -> Result<&mut Pipeline> {
        let rebuild = match &self.cached {
            Some(cached) => &cached.config != config,
            None => true,
        };

        if rebuild {
            tracing::info!("regenerating pipeline for {}", config.model_id);
            events::publish(Event::PipelineBuildStarted {
                model: config.model_id.clone(),
                backend: self.builder.name().to_string(),
            });
            let build_started = Instant::now();
            let pipeline = self.builder.build(config)?;
            events::publish(Event::PipelineBuildFinished {
                model: config.model_id.clone(),
                millis: build_started.elapsed().as_millis(),
            });
            self.cached = Some(CachedPipeline {
                config: config.clone(),
                pipeline,
            });
        }

        Ok(&mut self.cached.as_mut().unwrap().pipeline)
    }
}

/// Lazy, finite, non-restartable sequence of per-batch updates. Dropping the
/// stream abandons the remaining batches; images already written stay on
/// disk.
pub struct GenerationStream<'a> {
    pipeline: &'a mut Pipeline,
    scheduler: Box<dyn Scheduler>,
    embeddings: TextEmbeddings,
    request: GenerationRequest,
    output_dir: PathBuf,
    cancel: CancelToken,
    preview_hook: Option<Box<dyn FnMut(Preview) + Send + 'static>>,
    images: Vec<ImageData>,
    seeds: Vec<u32>,
    saved: Vec<PathBuf>,
    log: String,
    batch: usize,
    failed: bool,
    started: Instant,
}

impl std::fmt::Debug for GenerationStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationStream")
            .field("request", &self.request)
            .field("output_dir", &self.output_dir)
            .field("seeds", &self.seeds)
            .field("batch", &self.batch)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl<'a> GenerationStream<'a> {
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Receive intermediate (image, log) previews as the loop emits them.
    pub fn set_preview_hook(&mut self, hook: Box<dyn FnMut(Preview) + Send + 'static>) {
        self.preview_hook = Some(hook);
    }

    /// Full result once the stream has been drained (or abandoned early).
    pub fn into_result(self) -> GenerationResult {
        let req = &self.request;
        let mut text = format!("prompt=[{}]", req.prompt);
        text.push_str(&format!("\nnegative prompt=[{}]", req.negative_prompt));
        text.push_str(&format!(
            "\nmodel_id={}, ckpt_loc={}",
            req.model_id,
            req.custom_weights
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        ));
        text.push_str(&format!(
            "\nscheduler={}, device={}",
            req.scheduler, req.device
        ));
        text.push_str(&format!(
            "\nsteps={}, guidance_scale={}, seed={:?}",
            req.steps, req.guidance_scale, self.seeds
        ));
        text.push_str(&format!(
            "\nsize={}x{}, batch_count={}, batch_size={}, max_length={}",
            req.height, req.width, req.batch_count, req.batch_size, req.max_length
        ));
        text.push_str(&self.log);
        let total_time = self.started.elapsed();
        text.push_str(&format!(
            "\nTotal image generation time: {:.4}sec",
            total_time.as_secs_f64()
        ));

        GenerationResult {
            images: self.images,
            log: text,
            total_time,
            seeds: self.seeds,
        }
    }

    fn next_seed(&self) -> u32 {
        if self.batch == 0 {
            self.request.seed.resolve()
        } else if self.request.repeatable_seeds {
            self.seeds[0]
        } else {
            Seed::Random.resolve()
        }
    }

    fn run_batch(&mut self) -> Result<GenerationUpdate> {
        let index = self.batch;
        let count = self.request.batch_count;
        let seed = self.next_seed();

        events::publish(Event::BatchStarted { index, count, seed });
        let batch_started = Instant::now();

        self.scheduler.set_timesteps(self.request.steps);
        let latent = initial_latent(
            self.request.latent_dims(),
            seed,
            self.scheduler.init_noise_sigma(),
        );

        let mut observer = BatchObserver {
            total: self.request.steps,
            hook: self.preview_hook.as_deref_mut(),
        };

        let output = DenoiseLoop::new(
            self.pipeline.predictor.as_mut(),
            self.scheduler.as_mut(),
            self.pipeline.decoder.as_mut(),
        )
        .run(
            latent,
            &self.embeddings,
            &DenoiseConfig {
                guidance_scale: self.request.guidance_scale,
                preview_interval: self.request.preview_interval,
            },
            &self.cancel,
            &mut observer,
        )?;

        let first_image = output
            .images
            .first()
            .ok_or_else(|| anyhow::anyhow!("decoder returned no images"))?;
        let saved = save_output_img(first_image, seed, &self.request, &self.output_dir)?;
        self.saved.push(saved);
        self.log.push_str(&output.log);
        self.log.push('\n');
        self.images.extend(output.images);
        self.seeds.push(seed);
        self.batch += 1;

        events::publish(Event::BatchCompleted {
            index,
            count,
            millis: batch_started.elapsed().as_millis(),
        });

        Ok(GenerationUpdate {
            images: self.images.clone(),
            log: self.log.clone(),
            status: format!("Generating: {}/{}", self.batch, count),
            seeds: self.seeds.clone(),
            saved: self.saved.clone(),
        })
    }
}

impl<'a> Iterator for GenerationStream<'a> {
    type Item = Result<GenerationUpdate>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.batch >= self.request.batch_count {
            return None;
        }
        match self.run_batch() {
            Ok(update) => Some(Ok(update)),
            Err(err) => {
                self.failed = true;
                events::publish(Event::GenerationError {
                    message: err.to_string(),
                });
                Some(Err(err))
            }
        }
    }
}

struct BatchObserver<'h> {
    total: usize,
    hook: Option<&'h mut (dyn FnMut(Preview) + Send + 'static)>,
}

impl StepObserver for BatchObserver<'_> {
    fn on_step(&mut self, result: &StepResult, state: &DenoiseState) {
        events::publish(Event::StepCompleted {
            step: state.step,
            total: self.total,
            millis: result.duration.as_millis(),
        });
    }

    fn on_preview(&mut self, preview: Preview) {
        events::publish(Event::PreviewReady {
            step: preview.step,
        });
        if let Some(hook) = self.hook.as_mut() {
            hook(preview);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::DevPipelineBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingBuilder {
        inner: DevPipelineBuilder,
        builds: Arc<AtomicUsize>,
    }

    impl PipelineBuilder for CountingBuilder {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn build(&self, config: &PipelineConfig) -> Result<Pipeline> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            self.inner.build(config)
        }
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("diffstudio-studio-{}", uuid::Uuid::new_v4()))
    }

    fn studio_with_counter() -> (Studio, Arc<AtomicUsize>, PathBuf) {
        let builds = Arc::new(AtomicUsize::new(0));
        let dir = temp_dir();
        let studio = Studio::new(
            Box::new(CountingBuilder {
                inner: DevPipelineBuilder,
                builds: Arc::clone(&builds),
            }),
            &dir,
        );
        (studio, builds, dir)
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "a lighthouse at dusk".to_string(),
            model_id: "org/test-model".to_string(),
            steps: 4,
            height: 64,
            width: 64,
            seed: Seed::Fixed(77),
            batch_count: 1,
            ..Default::default()
        }
    }

    fn drain(stream: &mut GenerationStream<'_>) -> Vec<GenerationUpdate> {
        let mut updates = Vec::new();
        for item in stream.by_ref() {
            updates.push(item.unwrap());
        }
        updates
    }

    #[test]
    fn test_config_error_before_any_build() {
        let (mut studio, builds, dir) = studio_with_counter();
        let mut req = request();
        req.model_id.clear();
        let err = studio.generate(&req).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
        assert_eq!(builds.load(Ordering::SeqCst), 0);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_unknown_scheduler_rejected() {
        let (mut studio, _, dir) = studio_with_counter();
        let mut req = request();
        req.scheduler = "heun".to_string();
        assert!(studio.generate(&req).is_err());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_pipeline_cache_reused_and_invalidated() {
        let (mut studio, builds, dir) = studio_with_counter();
        let req = request();

        drain(&mut studio.generate(&req).unwrap());
        drain(&mut studio.generate(&req).unwrap());
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let mut changed = req.clone();
        changed.height = 128;
        drain(&mut studio.generate(&changed).unwrap());
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        // scheduler swap alone must not recompile
        let mut resched = changed.clone();
        resched.scheduler = "euler".to_string();
        drain(&mut studio.generate(&resched).unwrap());
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_repeatable_seeds_reuse_first_seed() {
        let (mut studio, _, dir) = studio_with_counter();
        let mut req = request();
        req.batch_count = 3;
        req.repeatable_seeds = true;

        let mut stream = studio.generate(&req).unwrap();
        let updates = drain(&mut stream);
        let result = stream.into_result();

        assert_eq!(updates.len(), 3);
        assert_eq!(result.seeds, vec![77, 77, 77]);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_fresh_seeds_without_repeatable_flag() {
        let (mut studio, _, dir) = studio_with_counter();
        let mut req = request();
        req.batch_count = 3;

        let mut stream = studio.generate(&req).unwrap();
        drain(&mut stream);
        let result = stream.into_result();

        assert_eq!(result.seeds.len(), 3);
        assert_eq!(result.seeds[0], 77);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_stream_yields_per_batch_and_accumulates() {
        let (mut studio, _, dir) = studio_with_counter();
        let mut req = request();
        req.batch_count = 2;

        let mut stream = studio.generate(&req).unwrap();

        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.images.len(), 1);
        assert_eq!(first.status, "Generating: 1/2");
        assert_eq!(first.saved.len(), 1);
        assert!(first.saved[0].exists());

        let second = stream.next().unwrap().unwrap();
        assert_eq!(second.images.len(), 2);
        assert_eq!(second.status, "Generating: 2/2");

        assert!(stream.next().is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_fixed_seed_runs_are_identical() {
        let run = || {
            let (mut studio, _, dir) = studio_with_counter();
            let mut stream = studio.generate(&request()).unwrap();
            drain(&mut stream);
            let result = stream.into_result();
            let _ = std::fs::remove_dir_all(dir);
            result
        };
        let a = run();
        let b = run();
        assert_eq!(a.images, b.images);
        assert_eq!(a.seeds, b.seeds);
    }

    #[test]
    fn test_preview_hook_receives_intermediates() {
        let (mut studio, _, dir) = studio_with_counter();
        let mut req = request();
        req.steps = 20;
        req.preview_interval = 5;

        let previews = Arc::new(AtomicUsize::new(0));
        let previews_in_hook = Arc::clone(&previews);

        let mut stream = studio.generate(&req).unwrap();
        stream.set_preview_hook(Box::new(move |_preview| {
            previews_in_hook.fetch_add(1, Ordering::SeqCst);
        }));
        drain(&mut stream);

        assert_eq!(previews.load(Ordering::SeqCst), 4);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_cancelled_stream_surfaces_error() {
        let (mut studio, _, dir) = studio_with_counter();
        let mut req = request();
        req.batch_count = 2;

        let mut stream = studio.generate(&req).unwrap();
        stream.cancel_token().cancel();

        let item = stream.next().unwrap();
        assert!(item.is_err());
        assert!(stream.next().is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_zero_step_request_yields_undenoised_image() {
        let (mut studio, _, dir) = studio_with_counter();
        let mut req = request();
        req.steps = 0;

        let mut stream = studio.generate(&req).unwrap();
        let updates = drain(&mut stream);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].images.len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }
}
