//! Subcommand implementations.

use std::path::PathBuf;

use burn::backend::ndarray::NdArray;

use mixtrain::{
    media_token_id, paired_labels, resolve_autocast, resolve_compute_dtype, text_only_labels,
    FrozenLinearProjection, HfTokenizer, Tokenizer, TokenSequences, TrainError, IGNORE_INDEX,
    MAPPING_DIM,
};

use crate::config::load_train_toml;

/// Backend used to load weights for inspection. Nothing is trained here.
type InspectBackend = NdArray<f32>;

/// Arguments for the `check-config` subcommand.
#[derive(Debug)]
pub struct CheckConfigArgs {
    /// Path to the training config TOML file.
    pub config: PathBuf,
}

/// Arguments for the `labels` subcommand.
#[derive(Debug)]
pub struct LabelsArgs {
    /// Path to a HuggingFace `tokenizer.json`.
    pub tokenizer: PathBuf,
    /// Text to tokenize.
    pub text: String,
    /// Build text-only labels instead of paired labels.
    pub text_only: bool,
    /// Explicit pad token.
    pub pad_token: Option<String>,
    /// Media placeholder literal.
    pub media_token: String,
}

/// Load a config and everything it points at, failing on the first problem.
pub fn run_check_config(args: CheckConfigArgs) -> anyhow::Result<()> {
    let toml = load_train_toml(&args.config)?;
    let epoch = &toml.epoch;
    epoch.validate()?;

    let tokenizer = HfTokenizer::from_file(&toml.tokenizer.path, toml.tokenizer.pad_token.as_deref())?;
    let media_id = media_token_id(&tokenizer, &epoch.media_token)?;

    let storage = resolve_compute_dtype(&epoch.precision);
    let autocast = resolve_autocast(&epoch.precision);

    if epoch.use_text_to_image_mapping {
        let path = epoch
            .mapping_matrix_path
            .as_deref()
            .ok_or(TrainError::MissingMappingPath)?;
        let device = Default::default();
        FrozenLinearProjection::<InspectBackend>::load(path, MAPPING_DIM, &device)?;
    }

    tracing::info!(
        config = %args.config.display(),
        precision = %epoch.precision,
        accum = epoch.gradient_accumulation_steps,
        media_token_id = media_id,
        pad_token_id = tokenizer.pad_token_id(),
        "Config OK"
    );

    println!("config:          {}", args.config.display());
    println!("precision:       {} (storage: {:?}, autocast: {:?})", epoch.precision, storage, autocast.dtype());
    println!("accumulation:    {}", epoch.gradient_accumulation_steps);
    println!("max grad norm:   {}", epoch.max_grad_norm);
    println!("metrics:         {}", if epoch.reports_metrics() { "on" } else { "off" });
    println!("media token:     {:?} -> {}", epoch.media_token, media_id);
    println!("pad token id:    {}", tokenizer.pad_token_id());
    match &epoch.mapping_matrix_path {
        Some(p) if epoch.use_text_to_image_mapping => println!("mapping:         {}", p.display()),
        _ => println!("mapping:         off"),
    }
    Ok(())
}

/// One token of a labels listing.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRow {
    pub position: usize,
    pub id: u32,
    pub label: i64,
}

/// Tokenize `text` and build its labels as the driver would.
pub fn label_rows<T: Tokenizer + ?Sized>(
    tokenizer: &T,
    text: &str,
    text_only: bool,
    media_token: &str,
) -> anyhow::Result<Vec<LabelRow>> {
    let ids = tokenizer.encode(text, true)?;
    let media = i64::from(media_token_id(tokenizer, media_token)?);
    let pad = i64::from(tokenizer.pad_token_id());

    let row: Vec<i64> = ids.iter().map(|&id| i64::from(id)).collect();
    let seqs = TokenSequences::unmasked(&[row])?;
    let labels = if text_only {
        text_only_labels(&seqs, pad, media)
    } else {
        paired_labels(&seqs, pad, media)
    };

    Ok(ids
        .iter()
        .zip(labels.row(0))
        .enumerate()
        .map(|(position, (&id, &label))| LabelRow { position, id, label })
        .collect())
}

/// Render rows as an aligned table. `token_of` maps ids back to token text.
pub fn render_label_rows(rows: &[LabelRow], token_of: impl Fn(u32) -> Option<String>) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:>5}  {:>8}  {:<20}  {:>8}\n", "pos", "id", "token", "label"));
    for row in rows {
        let token = token_of(row.id).unwrap_or_else(|| "?".to_string());
        let label = if row.label == IGNORE_INDEX {
            "ignore".to_string()
        } else {
            row.label.to_string()
        };
        out.push_str(&format!(
            "{:>5}  {:>8}  {:<20}  {:>8}\n",
            row.position,
            row.id,
            format!("{token:?}"),
            label
        ));
    }
    let supervised = rows.iter().filter(|r| r.label != IGNORE_INDEX).count();
    out.push_str(&format!("{supervised}/{} positions supervised\n", rows.len()));
    out
}

/// Print how a text would be labelled.
pub fn run_labels(args: LabelsArgs) -> anyhow::Result<()> {
    let tokenizer = HfTokenizer::from_file(&args.tokenizer, args.pad_token.as_deref())?;
    let rows = label_rows(&tokenizer, &args.text, args.text_only, &args.media_token)?;
    tracing::debug!(tokens = rows.len(), text_only = args.text_only, "Built labels");
    let table = render_label_rows(&rows, |id| tokenizer.inner().id_to_token(id));
    print!("{table}");
    Ok(())
}
