//! Command-line front end for training, testing and running nerve models.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Args, Parser, Subcommand};
use nerve_core::{ModelConfig, ScoreMetric};
use nerve_trainer::{JsonlObserver, Ner, TrainConfig, TrainOptions};
use tracing::info;

#[derive(Parser)]
#[command(name = "nerve-train")]
#[command(about = "Train and run BiLSTM-CRF named entity recognizers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Run on the first CUDA device when available
    #[arg(long, global = true, env = "NERVE_CUDA")]
    cuda: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model on a CoNLL file
    Train(TrainArgs),
    /// Score a saved model on a CoNLL file
    Test {
        /// Labeled data
        path: PathBuf,
        #[arg(short, long, env = "NERVE_SAVE_PATH", default_value = "./saves")]
        save_path: PathBuf,
        #[arg(short, long, default_value = "f1")]
        metric: ScoreMetric,
    },
    /// Print entities found in text, one JSON array per input line
    Predict {
        /// Text to tag; read from stdin when omitted
        text: Option<String>,
        #[arg(short, long, env = "NERVE_SAVE_PATH", default_value = "./saves")]
        save_path: PathBuf,
    },
}

#[derive(Args)]
struct TrainArgs {
    /// Training data
    train: PathBuf,
    /// Development data used to pick checkpoints
    #[arg(short, long)]
    dev: Option<PathBuf>,
    /// Pretrained word vectors
    #[arg(long)]
    vectors: Option<PathBuf>,
    #[arg(short, long, env = "NERVE_SAVE_PATH", default_value = "./saves")]
    save_path: PathBuf,
    /// Append per-epoch scalars to this JSON-lines file
    #[arg(long)]
    metrics_log: Option<PathBuf>,

    #[arg(long, env = "NERVE_LR", default_value_t = 0.01)]
    lr: f64,
    #[arg(long, env = "NERVE_LR_DECAY", default_value_t = 0.05)]
    lr_decay: f64,
    #[arg(short, long, env = "NERVE_EPOCHS", default_value_t = 300)]
    epochs: usize,
    #[arg(short, long, env = "NERVE_BATCH_SIZE", default_value_t = 128)]
    batch_size: usize,
    #[arg(long, env = "NERVE_SEED", default_value_t = 2019)]
    seed: u64,
    #[arg(long, default_value_t = 1)]
    min_freq: usize,
    #[arg(short, long, default_value = "f1")]
    metric: ScoreMetric,

    #[arg(long, default_value_t = 300)]
    embedding_dim: usize,
    #[arg(long, default_value_t = 300)]
    hidden_dim: usize,
    #[arg(long, default_value_t = 2)]
    num_layers: usize,
    #[arg(long, default_value_t = 0.5)]
    dropout: f32,
    /// Freeze the embedding matrix
    #[arg(long)]
    static_embeddings: bool,
    /// Forbid invalid IOB transitions when decoding
    #[arg(long)]
    constrained: bool,
}

impl TrainArgs {
    fn options(self) -> (TrainOptions, Option<PathBuf>) {
        let model = ModelConfig {
            embedding_dim: self.embedding_dim,
            hidden_dim: self.hidden_dim,
            num_layers: self.num_layers,
            dropout: self.dropout,
            static_embeddings: self.static_embeddings,
            constrained_decoding: self.constrained,
            ..ModelConfig::default()
        };
        let config = TrainConfig {
            lr: self.lr,
            lr_decay: self.lr_decay,
            epochs: self.epochs,
            batch_size: self.batch_size,
            seed: self.seed,
            min_freq: self.min_freq,
            save_path: self.save_path,
            metric: self.metric,
            model,
        };
        let options = TrainOptions {
            train_path: self.train,
            dev_path: self.dev,
            vectors_path: self.vectors,
            config,
        };
        (options, self.metrics_log)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let device = if cli.cuda {
        Device::cuda_if_available(0).context("failed to select CUDA device")?
    } else {
        Device::Cpu
    };
    let mut ner = Ner::new(device);

    match cli.command {
        Commands::Train(args) => {
            let (options, metrics_log) = args.options();
            let train_path = options.train_path.clone();
            let save_path = options.config.save_path.clone();

            let summary = match metrics_log {
                Some(path) => {
                    let observer = JsonlObserver::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    ner.train_with_observer(options, observer)
                }
                None => ner.train(options),
            }
            .with_context(|| format!("training on {} failed", train_path.display()))?;

            match (summary.best_epoch, summary.best_score) {
                (Some(epoch), Some(score)) => info!(epoch, score, "best dev score"),
                _ => info!(epochs = summary.epochs.len(), "training finished"),
            }
            info!(path = %save_path.display(), "checkpoint directory");
        }
        Commands::Test {
            path,
            save_path,
            metric,
        } => {
            ner.load(&save_path)
                .with_context(|| format!("failed to load model from {}", save_path.display()))?;
            let score = ner
                .test(&path, metric)
                .with_context(|| format!("failed to score {}", path.display()))?;
            println!("{score:.4}");
        }
        Commands::Predict { text, save_path } => {
            ner.load(&save_path)
                .with_context(|| format!("failed to load model from {}", save_path.display()))?;

            let mut stdout = io::stdout().lock();
            match text {
                Some(text) => print_entities(&ner, &text, &mut stdout)?,
                None => {
                    for line in io::stdin().lock().lines() {
                        print_entities(&ner, &line?, &mut stdout)?;
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_entities<W: Write>(ner: &Ner, text: &str, out: &mut W) -> Result<()> {
    let entities = ner.predict_text(text)?;
    serde_json::to_writer(&mut *out, &entities)?;
    writeln!(out)?;
    Ok(())
}
