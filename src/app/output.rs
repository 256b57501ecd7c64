use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::{GenerationRequest, ImageData, Result};

/// Write one generated image under `out_dir`, with the seed and step count
/// encoded in the filename. Returns the image path.
pub fn save_output_img(
    image: &ImageData,
    seed: u32,
    request: &GenerationRequest,
    out_dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)?;

    let stamp = Local::now().format("%Y%m%d_%H%M%S%3f");
    let stem = format!("{}_{}_{}steps", stamp, seed, request.steps);
    let img_path = out_dir.join(format!("{}.png", stem));
    image.save_png(&img_path)?;

    if request.save_metadata {
        let sidecar = out_dir.join(format!("{}.json", stem));
        fs::write(&sidecar, serde_json::to_string_pretty(&metadata(request, seed))?)?;
    }

    Ok(img_path)
}

fn metadata(request: &GenerationRequest, seed: u32) -> serde_json::Value {
    serde_json::json!({
        "prompt": request.prompt,
        "negative_prompt": request.negative_prompt,
        "model_id": request.model_id,
        "custom_weights": request.custom_weights,
        "scheduler": request.scheduler,
        "steps": request.steps,
        "guidance_scale": request.guidance_scale,
        "seed": seed,
        "height": request.height,
        "width": request.width,
        "precision": request.precision.as_str(),
        "device": request.device.to_string(),
    })
}
