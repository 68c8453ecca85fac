//! Offline, one-shot conversion of the trained potato leaf model into the
//! NNEF artifact served by `potato-leaf-server`.

mod convert;

use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

use convert::{convert, ConvertOptions, InputShape, Strategy};

#[derive(Parser, Debug)]
#[command(name = "potato-leaf-converter")]
#[command(version)]
#[command(about = "Convert a trained model (.onnx or .pb) into a tract NNEF artifact")]
struct Cli {
    /// Trained model to convert
    #[arg(short, long, default_value = "potato_model.onnx")]
    input: PathBuf,

    /// Where to write the artifact
    #[arg(short, long, default_value = "potato_model.nnef.tar")]
    output: PathBuf,

    /// Input image height
    #[arg(long, default_value_t = 255)]
    height: usize,

    /// Input image width
    #[arg(long, default_value_t = 255)]
    width: usize,

    /// Input channels
    #[arg(long, default_value_t = 3)]
    channels: usize,

    /// Fix the batch dimension instead of leaving it symbolic
    #[arg(long)]
    batch_size: Option<usize>,

    /// How the artifact's input signature is decided
    #[arg(long, value_enum, default_value_t = Strategy::Pinned)]
    strategy: Strategy,

    /// Fail instead of retrying with the inferred signature
    #[arg(long)]
    no_fallback: bool,
}

impl From<Cli> for ConvertOptions {
    fn from(cli: Cli) -> Self {
        ConvertOptions {
            input: cli.input,
            output: cli.output,
            shape: InputShape {
                batch: cli.batch_size,
                height: cli.height,
                width: cli.width,
                channels: cli.channels,
            },
            strategy: cli.strategy,
            fallback: !cli.no_fallback,
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format_module_path(false)
        .init();

    let options = ConvertOptions::from(Cli::parse());
    info!(
        "Converting {} -> {}",
        options.input.display(),
        options.output.display()
    );

    match convert(&options) {
        Ok(summary) => {
            info!("Signature: {:?}", summary.strategy);
            for fact in &summary.inputs {
                info!("  input  {}", fact);
            }
            for fact in &summary.outputs {
                info!("  output {}", fact);
            }
            Ok(())
        }
        Err(e) => {
            error!("An error occurred: {}", e);
            Err(e.into())
        }
    }
}
