use anyhow::Context;
use clap::{Parser, Subcommand};
use kiln_assets::Manifest;
use kiln_input::{InputState, Key};
use kiln_render::{FrameReport, HeadlessContext, RenderOptions};
use kiln_scene::Game;
use kiln_tools::SceneInspector;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Simulated frame length for scripted renders.
const FRAME_DT: f32 = 1.0 / 60.0;

#[derive(Parser)]
#[command(name = "kiln-cli", about = "Headless tools for kiln scenes")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions
    Info,
    /// Load and validate a scene manifest
    Validate {
        /// Path to the scene YAML
        scene: PathBuf,
    },
    /// Build a scene without a GPU and render frames while moving the camera forward
    Render {
        /// Path to the scene YAML
        scene: PathBuf,
        /// Number of frames to render
        #[arg(short, long, default_value = "3")]
        frames: u32,
        /// Print the frame reports as JSON
        #[arg(long)]
        json: bool,
        /// Fail on the first shader binding mismatch instead of skipping the draw
        #[arg(long)]
        strict: bool,
        #[arg(long, default_value = "1280")]
        width: u32,
        #[arg(long, default_value = "720")]
        height: u32,
    },
}

/// Build `manifest` on a headless context and run `frames` frames with W held.
fn render_frames(
    manifest: &Manifest,
    frames: u32,
    options: RenderOptions,
    width: u32,
    height: u32,
) -> anyhow::Result<(Game, Vec<FrameReport>)> {
    let mut gfx = HeadlessContext::new(width, height);
    let mut game = Game::build(&mut gfx, manifest, options).context("building scene")?;
    game.on_resize(&mut gfx, width, height)?;

    let mut input = InputState::new();
    input.press(Key::W);
    let mut reports = Vec::with_capacity(frames as usize);
    for i in 0..frames {
        let total = i as f32 * FRAME_DT;
        let report = game
            .frame(&mut gfx, &input, FRAME_DT, total, |_, _| {})
            .with_context(|| format!("rendering frame {i}"))?;
        input.end_frame();
        reports.push(report);
    }
    Ok((game, reports))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("kiln-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", kiln_common::crate_info());
            println!("input: {}", kiln_input::crate_info());
            println!("render: {}", kiln_render::crate_info());
            println!("assets: {}", kiln_assets::crate_info());
            println!("scene: {}", kiln_scene::crate_info());
            println!("tools: {}", kiln_tools::crate_info());
        }
        Commands::Validate { scene } => {
            let manifest = Manifest::load(&scene)
                .with_context(|| format!("validating {}", scene.display()))?;
            println!(
                "{}: ok ({} meshes, {} textures, {} materials, {} entities, {} lights, {} cameras, sky: {})",
                scene.display(),
                manifest.meshes.len(),
                manifest.textures.len(),
                manifest.materials.len(),
                manifest.entities.len(),
                manifest.lights.len(),
                manifest.cameras.len(),
                if manifest.sky.is_some() { "yes" } else { "no" },
            );
        }
        Commands::Render {
            scene,
            frames,
            json,
            strict,
            width,
            height,
        } => {
            let manifest = Manifest::load(&scene)
                .with_context(|| format!("loading {}", scene.display()))?;
            let options = RenderOptions {
                strict_bindings: strict,
            };
            let (game, reports) = render_frames(&manifest, frames, options, width, height)?;
            tracing::info!(frames = reports.len(), "render finished");

            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                println!("{}", SceneInspector::summary(&game));
                for r in &reports {
                    let [x, y, z] = r.camera_position;
                    println!(
                        "frame {}: {} shadow, {} color, {} skipped, {} triangles, sky {}, camera ({x:.2}, {y:.2}, {z:.2})",
                        r.frame,
                        r.shadow_draws,
                        r.color_draws,
                        r.skipped_draws,
                        r.triangles,
                        if r.sky_drawn { "on" } else { "off" },
                    );
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const SCENE: &str = r#"
meshes:
  - name: cube
    shape: cube
materials:
  - name: plain
entities:
  - name: box
    mesh: cube
    material: plain
lights:
  - kind: directional
    direction: [0.3, -1, 0.2]
cameras:
  - position: [0, 0, -10]
    look_at: [0, 0, 0]
"#;

    #[test]
    fn scripted_render_moves_forward() {
        let manifest = Manifest::from_yaml_str(SCENE, Path::new("cli.yaml")).unwrap();
        let (_, reports) =
            render_frames(&manifest, 3, RenderOptions::default(), 320, 240).unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.color_draws == 1 && r.shadow_draws == 1));
        assert!(reports[2].camera_position[2] > reports[0].camera_position[2]);
    }

    #[test]
    fn demo_scene_renders_strictly() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/scene.yaml");
        let manifest = Manifest::load(&path).unwrap();
        let options = RenderOptions {
            strict_bindings: true,
        };
        let (_, reports) = render_frames(&manifest, 2, options, 640, 360).unwrap();
        let last = &reports[1];
        assert_eq!(last.color_draws, 5);
        assert_eq!(last.shadow_draws, 5);
        assert_eq!(last.skipped_draws, 0);
        assert!(last.sky_drawn);
    }

    #[test]
    fn scene_without_camera_fails_to_render() {
        let manifest = Manifest::from_yaml_str("{}", Path::new("empty.yaml")).unwrap();
        assert!(render_frames(&manifest, 1, RenderOptions::default(), 320, 240).is_err());
    }

    #[test]
    fn reports_serialize() {
        let manifest = Manifest::from_yaml_str(SCENE, Path::new("cli.yaml")).unwrap();
        let (_, reports) =
            render_frames(&manifest, 1, RenderOptions::default(), 320, 240).unwrap();
        let json = serde_json::to_value(&reports).unwrap();
        assert_eq!(json[0]["color_draws"], 1);
    }
}
