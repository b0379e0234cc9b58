//! TorchScript landmark backend.
//!
//! The exported module is called as `forward(frame, previous, elapsed_ms)`:
//! - `frame`: float RGB tensor `[1, 3, H, W]` scaled to `[0, 1]`,
//! - `previous`: image landmarks returned by the previous call (`[0, K, 3]`
//!   on the first call or in image mode),
//! - `elapsed_ms`: milliseconds since the previous call.
//!
//! It returns `(image[N, K, 3], world[N, K, 3], presence[N], handedness[N])`.
//! `world` may be empty for models that do not estimate metric coordinates and
//! `handedness` is the probability of a right hand.

use anyhow::{Context, Result, anyhow, bail};
use image::RgbImage;
use tch::{CModule, Device, IValue, Kind, Tensor};
use tracing::{debug, info};

use crate::{
    detector::{DetectorFactory, DetectorOptions, LandmarkDetector, RawInstances, RunningMode},
    landmarks::{DetectionResult, Landmark},
    runtime::preload_cuda_runtime,
    variant::DetectorVariant,
};

/// Loads one TorchScript module per `create` call on a fixed device.
pub struct TorchDetectorFactory {
    device: Device,
}

impl TorchDetectorFactory {
    pub fn new(use_cpu: bool, verbose: bool) -> Self {
        let device = if use_cpu {
            Device::Cpu
        } else {
            preload_cuda_runtime(verbose);
            Device::cuda_if_available()
        };
        info!("ml-core: landmark models run on {device:?}");
        Self { device }
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

impl DetectorFactory for TorchDetectorFactory {
    fn create(&self, options: &DetectorOptions) -> Result<Box<dyn LandmarkDetector>> {
        options.validate()?;
        let module = CModule::load_on_device(&options.model_path, self.device).with_context(
            || format!("failed to load {} model {:?}", options.variant, options.model_path),
        )?;
        debug!(
            "ml-core: loaded {} model from {}",
            options.variant,
            options.model_path.display()
        );
        Ok(Box::new(TorchLandmarker {
            module,
            device: self.device,
            options: options.clone(),
            previous: None,
            last_timestamp_ms: None,
        }))
    }
}

pub struct TorchLandmarker {
    module: CModule,
    device: Device,
    options: DetectorOptions,
    previous: Option<Tensor>,
    last_timestamp_ms: Option<i64>,
}

impl TorchLandmarker {
    fn frame_tensor(&self, image: &RgbImage) -> Result<Tensor> {
        let (width, height) = (image.width() as i64, image.height() as i64);
        let expected = (width as usize) * (height as usize) * 3;
        if image.as_raw().len() != expected {
            bail!(
                "unexpected frame buffer size: got {} bytes, expected {expected}",
                image.as_raw().len()
            );
        }

        let tensor = Tensor::from_slice(image.as_raw())
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, height, width, 3])
            .permute([0, 3, 1, 2])
            / 255.0;

        Ok(match self.options.input_size() {
            Some((w, h)) if (w as i64, h as i64) != (width, height) => {
                tensor.upsample_bilinear2d([h as i64, w as i64], false, None::<f64>, None::<f64>)
            }
            _ => tensor,
        })
    }

    fn previous_landmarks(&self) -> Tensor {
        match (&self.previous, self.options.running_mode) {
            (Some(previous), RunningMode::Video) => previous.shallow_clone(),
            _ => {
                let points = self.options.variant.landmark_count() as i64;
                Tensor::zeros([0, points, 3], (Kind::Float, self.device))
            }
        }
    }
}

fn expect_tensor(value: IValue, what: &str) -> Result<Tensor> {
    match value {
        IValue::Tensor(tensor) => Ok(tensor),
        other => Err(anyhow!("{what}: expected a tensor, got {other:?}")),
    }
}

/// Flatten an `[N, K, 3]` tensor into `N` vectors of landmarks.
fn to_landmarks(tensor: &Tensor) -> Result<Vec<Vec<Landmark>>> {
    let shape = tensor.size();
    if tensor.numel() == 0 {
        return Ok(Vec::new());
    }
    if shape.len() != 3 || shape[2] < 3 {
        bail!("landmark tensor must be [N, K, 3], got {shape:?}");
    }
    let host = tensor
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .narrow(2, 0, 3)
        .contiguous();
    let instances: Vec<Vec<Vec<f32>>> = (0..shape[0])
        .map(|n| Vec::<Vec<f32>>::try_from(&host.get(n)))
        .collect::<Result<_, _>>()?;
    Ok(instances
        .into_iter()
        .map(|points| {
            points
                .into_iter()
                .map(|p| Landmark::new(p[0], p[1], p[2]))
                .collect()
        })
        .collect())
}

fn to_scores(tensor: &Tensor) -> Result<Vec<f32>> {
    let flat = tensor
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .contiguous()
        .view([-1]);
    Ok(Vec::<f32>::try_from(&flat)?)
}

impl LandmarkDetector for TorchLandmarker {
    fn variant(&self) -> DetectorVariant {
        self.options.variant
    }

    fn detect(&mut self, image: &RgbImage, timestamp_ms: i64) -> Result<DetectionResult> {
        let variant = self.options.variant;
        let frame = self.frame_tensor(image)?;
        let previous = self.previous_landmarks();
        let elapsed = self
            .last_timestamp_ms
            .map_or(0, |last| (timestamp_ms - last).max(0));

        let output = tch::no_grad(|| {
            self.module.forward_is(&[
                IValue::Tensor(frame),
                IValue::Tensor(previous),
                IValue::Int(elapsed),
            ])
        })?;
        let mut parts = match output {
            IValue::Tuple(parts) if parts.len() == 4 => parts.into_iter(),
            other => bail!("{variant} model must return a 4-tuple, got {other:?}"),
        };
        let mut next = |what: &str| -> Result<Tensor> {
            let value = parts
                .next()
                .ok_or_else(|| anyhow!("{variant} model output is missing {what}"))?;
            expect_tensor(value, what)
        };
        let image_points = next("image landmarks")?;
        let world_points = next("world landmarks")?;
        let presence = to_scores(&next("presence")?)?;
        let handedness = to_scores(&next("handedness")?)?;

        let world = if variant.reports_world() {
            to_landmarks(&world_points)?
        } else {
            Vec::new()
        };
        let sets = self.options.select_instances(RawInstances {
            image: to_landmarks(&image_points)?,
            world,
            presence,
            handedness,
        })?;

        self.previous = match self.options.running_mode {
            RunningMode::Video => Some(image_points),
            RunningMode::Image => None,
        };
        self.last_timestamp_ms = Some(timestamp_ms);
        Ok(DetectionResult::new(variant, sets))
    }
}
