// CLI entry for barycenter
use anyhow::Result;
use barycenter::{default_config, process, Config, Params};
use clap::{Parser, ValueHint};
use env_logger::Env;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "barycenter", version, about = "Find the E-LPIPS average (barycenter) of two images")]
struct Cli {
    /// Input images to average (.png, .jpg or .npy)
    #[arg(value_hint = ValueHint::FilePath, num_args = 2, required = true)]
    images: Vec<PathBuf>,

    /// Output directory for intermediate files
    #[arg(long, default_value = "out_bary2", value_hint = ValueHint::DirPath)]
    outdir: PathBuf,

    /// Number of iterations to run
    #[arg(long, default_value_t = 100_000)]
    steps: u64,

    /// elpips_vgg, elpips_squeeze_maxpool, lpips_vgg or lpips_squeeze
    #[arg(long, default_value = "elpips_vgg")]
    metric: String,

    /// Random seed (-1 for random)
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    seed: i64,

    /// Step size multiplier for the optimization
    #[arg(long = "learning_rate", default_value_t = 0.03)]
    learning_rate: f32,
}

fn build_config(cli: &Cli) -> Config {
    let mut cfg = default_config();
    cfg.steps = cli.steps;
    cfg.learning_rate = cli.learning_rate;
    cfg.seed = u64::try_from(cli.seed).ok();
    cfg.metric = cli.metric.clone();
    cfg
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let cfg = build_config(&cli);
    let params = Params {
        images: [cli.images[0].clone(), cli.images[1].clone()],
        outdir: cli.outdir,
        config: cfg,
    };
    process(params)
}
