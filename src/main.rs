use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process;
use tessitura::analysis::Analyzer;
use tessitura::args::{Cli, Commands, ConfigAction, EditArgs, ModelArgs};
use tessitura::config::{self, EditorConfig};
use tessitura::editor::Editor;
use tessitura::features::FrameGrid;
use tessitura::project::{document, NoteId, Project, Vibrato};
use tessitura::util::{midi_to_hz, note_name};
use tessitura::vocoder::{neural, HarmonicVocoder, NeuralVocoder, VocoderAdapter};

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        log::error!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = config::config_dir()?.join("config.kdl");
    let config = EditorConfig::load_or_default(&config_path)?;

    match cli.command {
        Commands::Analyze { input, models, no_cache } => {
            let mut analyzer = analyzer(&models)?;
            analyzer.use_cache = !no_cache;
            let project = analyzer.open_audio(&input)?;
            let voiced = project.features.voiced.iter().filter(|&&v| v).count();
            println!(
                "{}: {:.2}s, {} frames ({} voiced), {} notes",
                input.display(),
                project.features.duration_seconds(),
                project.num_frames(),
                voiced,
                project.notes().len()
            );
        }
        Commands::Notes { input, models } => {
            let project = open_input(&mut analyzer(&models)?, &input)?;
            print_notes(&project);
        }
        Commands::Edit(args) => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(edit(args, &config))?;
        }
        Commands::Render { input, output, models } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(render(&input, &output, &models, &config))?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("# {}", config_path.display());
                print!("{}", config.to_kdl());
            }
            ConfigAction::Set {
                device,
                threads,
                dashed_original_pitch_line,
            } => {
                let mut config = config;
                if let Some(device) = device {
                    config.set_device(device.parse().map_err(anyhow::Error::msg)?);
                }
                if let Some(threads) = threads {
                    config.set_threads(threads);
                }
                if let Some(dashed) = dashed_original_pitch_line {
                    config.set_dashed_original_pitch_line(dashed);
                }
                config.save(&config_path)?;
                println!("Saved {}", config_path.display());
            }
        },
    }

    Ok(())
}

fn models_dir(models: &ModelArgs) -> Result<PathBuf> {
    match &models.models_dir {
        Some(dir) => Ok(dir.clone()),
        None => config::default_models_dir(),
    }
}

fn analyzer(models: &ModelArgs) -> Result<Analyzer> {
    let dir = models_dir(models)?;
    Ok(Analyzer::new(FrameGrid::default(), Some(&dir)))
}

/// Project documents are reopened, anything else is analysed as audio.
fn open_input(analyzer: &mut Analyzer, input: &Path) -> Result<Project> {
    let is_document = input
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(document::EXTENSION));
    if is_document {
        analyzer.open_project(input)
    } else {
        analyzer.open_audio(input)
    }
}

fn load_vocoder(models: &ModelArgs, config: &EditorConfig) -> Result<VocoderAdapter> {
    if models.harmonic {
        return Ok(VocoderAdapter::new(Box::new(HarmonicVocoder::new())));
    }
    let mut vocoder = VocoderAdapter::new(Box::new(NeuralVocoder::new()));
    config.apply(&mut vocoder)?;
    let model = models_dir(models)?.join(neural::MODEL_FILE);
    vocoder
        .load(&model)
        .with_context(|| format!("Failed to load vocoder {} (pass --harmonic to synthesize without it)", model.display()))?;
    Ok(vocoder)
}

fn print_notes(project: &Project) {
    let grid = project.grid();
    println!(
        "{:>4} {:>6} {:>8} {:>8} {:>5} {:>8} {:>8}",
        "idx", "id", "start", "length", "pitch", "hz", "offset"
    );
    for (index, note) in project.notes().iter().enumerate() {
        println!(
            "{:>4} {:>6} {:>8.3} {:>8.3} {:>5} {:>8.1} {:>+8.2}",
            index,
            note.id.to_string(),
            note.start_seconds(grid.hop_size, grid.sample_rate),
            note.duration_seconds(grid.hop_size, grid.sample_rate),
            note_name(note.effective_midi() as f32),
            midi_to_hz(note.effective_midi() as f32),
            note.pitch_offset
        );
    }
}

async fn edit(args: EditArgs, config: &EditorConfig) -> Result<()> {
    let project = open_input(&mut analyzer(&args.models)?, &args.input)?;
    let vocoder = load_vocoder(&args.models, config)?;
    let mut editor = Editor::new(project, vocoder);

    let ids: Vec<NoteId> = editor.project().notes().iter().map(|n| n.id).collect();
    let note = |index: usize| {
        ids.get(index)
            .copied()
            .with_context(|| format!("No note at index {} ({} notes)", index, ids.len()))
    };

    for shift in &args.shifts {
        editor.shift_note_pitch(note(shift.index)?, shift.semitones)?;
    }
    for target in &args.to_pitch {
        editor.set_note_to_pitch(note(target.index)?, target.midi as f64)?;
    }
    for &index in &args.snap {
        editor.snap_note_to_semitone(note(index)?)?;
    }
    for v in &args.vibrato {
        let vibrato = Vibrato::new(v.rate_hz, v.depth_semitones, v.phase_radians);
        editor.set_note_vibrato(note(v.index)?, vibrato)?;
    }
    if args.reset_f0 {
        log::info!("Restored {} frames of the detected contour", editor.reset_f0());
    }
    for stroke in &args.strokes {
        let changed = editor.draw_f0(&stroke.0);
        log::info!("Stroke changed {} frames", changed);
    }
    if let Some(global) = args.global {
        editor.set_global_pitch_offset(global);
    }
    if let Some(volume) = args.volume {
        editor.set_volume(volume);
    }
    if args.render.is_some() {
        // a reopened document may carry edits the decoded audio lacks
        editor.resynthesize()?;
    }

    editor.settle().await.context("Resynthesis failed")?;

    document::save(editor.project(), &args.output)?;
    println!("Saved {}", args.output.display());
    if let Some(path) = &args.render {
        editor.export_wav(path)?;
        println!("Rendered {}", path.display());
    }
    Ok(())
}

async fn render(input: &Path, output: &Path, models: &ModelArgs, config: &EditorConfig) -> Result<()> {
    let project = open_input(&mut analyzer(models)?, input)?;
    let vocoder = load_vocoder(models, config)?;
    let mut editor = Editor::new(project, vocoder);

    editor.resynthesize()?;
    editor.settle().await.context("Resynthesis failed")?;
    editor.export_wav(output)?;
    println!("Rendered {}", output.display());
    Ok(())
}
