//! Server configuration
//!
//! Every knob has a default matching the deployed model, and can be set from
//! the command line or the environment.

use std::path::PathBuf;

use clap::Parser;

use crate::diseases::default_labels;

pub const DEFAULT_INPUT_SIZE: u32 = 255;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "potato-leaf-server")]
#[command(version)]
#[command(about = "Potato leaf disease detection through an upload form")]
pub struct Cli {
    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Number of HTTP workers (defaults to the number of CPUs)
    #[arg(long, env = "WORKERS")]
    pub workers: Option<usize>,

    /// Inference artifact (.nnef.tar, .nnef.tgz, .onnx or .pb)
    #[arg(long, env = "MODEL_PATH", default_value = "potato_model.nnef.tar")]
    pub model_path: PathBuf,

    /// Directory uploads are written to and served from under /static
    #[arg(long, env = "STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    /// Accepted file suffixes, compared case-insensitively
    #[arg(
        long,
        env = "ALLOWED_EXTENSIONS",
        value_delimiter = ',',
        default_values = ["png", "jpg", "jpeg"]
    )]
    pub allowed_extensions: Vec<String>,

    /// Side of the square the image is resized to
    #[arg(long, env = "INPUT_SIZE", default_value_t = DEFAULT_INPUT_SIZE)]
    pub input_size: u32,

    /// Batch dimension fed to the model; legacy fixed-batch artifacts need 32
    #[arg(long, env = "BATCH_SIZE", default_value_t = 1)]
    pub batch_size: usize,

    /// Class identifiers in model output order
    #[arg(long, env = "CLASS_LABELS", value_delimiter = ',')]
    pub labels: Vec<String>,

    /// Largest accepted upload in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub model_path: PathBuf,
    pub static_dir: PathBuf,
    pub allowed_extensions: Vec<String>,
    pub input_size: u32,
    pub batch_size: usize,
    pub labels: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: num_cpus::get(),
            model_path: PathBuf::from("potato_model.nnef.tar"),
            static_dir: PathBuf::from("static"),
            allowed_extensions: vec!["png".into(), "jpg".into(), "jpeg".into()],
            input_size: DEFAULT_INPUT_SIZE,
            batch_size: 1,
            labels: default_labels(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        let defaults = ServerConfig::default();
        Self {
            host: cli.host,
            port: cli.port,
            workers: cli.workers.unwrap_or(defaults.workers),
            model_path: cli.model_path,
            static_dir: cli.static_dir,
            allowed_extensions: cli
                .allowed_extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            input_size: cli.input_size,
            batch_size: cli.batch_size,
            labels: if cli.labels.is_empty() {
                defaults.labels
            } else {
                cli.labels.iter().map(|l| l.trim().to_string()).collect()
            },
            max_upload_bytes: cli.max_upload_bytes,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.input_size == 0 {
            return Err("input_size must be > 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be > 0".to_string());
        }
        if self.allowed_extensions.is_empty() {
            return Err("at least one allowed extension is required".to_string());
        }
        if self.labels.is_empty() || self.labels.iter().any(|l| l.is_empty()) {
            return Err("class labels must be non-empty".to_string());
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Shape of one model input: `[batch, height, width, channels]`.
    pub fn input_shape(&self) -> [usize; 4] {
        let side = self.input_size as usize;
        [self.batch_size, side, side, 3]
    }
}
