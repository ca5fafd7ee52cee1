use egui::{CollapsingHeader, DragValue, Slider, Ui};
use glam::{Vec2, Vec3};
use kiln_render::Light;
use kiln_scene::Game;

/// The egui overlay: application details, meshes, entities, materials, lights,
/// camera, ambient colour and shadows. Every edit is applied to the game
/// immediately; material edits affect every entity sharing the material.
#[derive(Debug, Clone)]
pub struct InspectorPanel {
    open: bool,
    selected: Option<usize>,
}

impl Default for InspectorPanel {
    fn default() -> Self {
        Self {
            open: true,
            selected: Some(0),
        }
    }
}

impl InspectorPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn toggle(&mut self) {
        self.open = !self.open;
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn select(&mut self, index: Option<usize>) {
        self.selected = index;
    }

    pub fn show(&mut self, ctx: &egui::Context, game: &mut Game) {
        if !self.open {
            return;
        }
        egui::SidePanel::left("inspector")
            .default_width(300.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    ui.heading("Inspector");
                    ui.separator();
                    application(ui, game);
                    meshes(ui, game);
                    self.entities(ui, game);
                    materials(ui, game);
                    lights(ui, game);
                    camera(ui, game);
                    environment(ui, game);
                    ui.separator();
                    ui.small("F1: Toggle Inspector | RMB: Look | WASD: Move | Shift: Boost");
                });
            });
    }

    fn entities(&mut self, ui: &mut Ui, game: &mut Game) {
        CollapsingHeader::new("Entities")
            .default_open(true)
            .show(ui, |ui| {
                for (i, entity) in game.entities().iter().enumerate() {
                    let is_selected = self.selected == Some(i);
                    if ui.selectable_label(is_selected, entity.name()).clicked() {
                        self.selected = Some(i);
                    }
                }

                let Some(entity) = self
                    .selected
                    .and_then(|i| game.entities_mut().get_mut(i))
                else {
                    return;
                };
                ui.separator();
                let transform = entity.transform_mut();

                let mut position = transform.position();
                if vec3_row(ui, "Position", &mut position, 0.1) {
                    transform.set_position(position);
                }
                let mut degrees = transform.rotation() * (180.0 / std::f32::consts::PI);
                if vec3_row(ui, "Rotation (deg)", &mut degrees, 1.0) {
                    transform.set_rotation(degrees * (std::f32::consts::PI / 180.0));
                }
                let mut scale = transform.scale();
                if vec3_row(ui, "Scale", &mut scale, 0.05) {
                    transform.set_scale(scale);
                }
            });
    }
}

fn application(ui: &mut Ui, game: &mut Game) {
    CollapsingHeader::new("Application")
        .default_open(true)
        .show(ui, |ui| {
            ui.label(format!(
                "Frame rate: {:.0} fps ({:.2} ms)",
                game.fps(),
                game.frame_time() * 1000.0
            ));
            let (width, height) = game.renderer().main_targets().viewport.size();
            ui.label(format!("Resolution: {width} x {height}"));
            if let Some(report) = game.last_report() {
                ui.label(format!(
                    "Draws: {} shadow, {} color, {} skipped",
                    report.shadow_draws, report.color_draws, report.skipped_draws
                ));
            }
            ui.horizontal(|ui| {
                ui.label("Background");
                let mut rgba = game.background().to_array();
                if ui.color_edit_button_rgba_unmultiplied(&mut rgba).changed() {
                    game.set_background(rgba.into());
                }
            });
        });
}

fn meshes(ui: &mut Ui, game: &Game) {
    CollapsingHeader::new("Meshes").show(ui, |ui| {
        for (_, mesh) in game.library().meshes() {
            ui.label(format!(
                "{}: {} triangles, {} vertices, {} indices",
                mesh.name(),
                mesh.triangle_count(),
                mesh.vertex_count(),
                mesh.index_count()
            ));
        }
    });
}

fn materials(ui: &mut Ui, game: &mut Game) {
    CollapsingHeader::new("Materials").show(ui, |ui| {
        for (_, material) in game.library_mut().materials_mut() {
            ui.push_id(material.name().to_string(), |ui| {
                ui.label(material.name().to_string());

                let mut tint = material.color_tint().to_array();
                ui.horizontal(|ui| {
                    ui.label("Tint");
                    if ui.color_edit_button_rgba_unmultiplied(&mut tint).changed() {
                        material.set_color_tint(tint.into());
                    }
                });

                let mut uv_scale = material.uv_scale();
                if vec2_row(ui, "UV scale", &mut uv_scale) {
                    material.set_uv_scale(uv_scale);
                }
                let mut uv_offset = material.uv_offset();
                if vec2_row(ui, "UV offset", &mut uv_offset) {
                    material.set_uv_offset(uv_offset);
                }

                let mut roughness = material.roughness();
                if ui
                    .add(Slider::new(&mut roughness, 0.0..=1.0).text("Roughness"))
                    .changed()
                {
                    material.set_roughness(roughness);
                }
                ui.separator();
            });
        }
    });
}

fn lights(ui: &mut Ui, game: &mut Game) {
    CollapsingHeader::new("Lights").show(ui, |ui| {
        for (i, light) in game.lights_mut().iter_mut().enumerate() {
            ui.push_id(i, |ui| light_editor(ui, i, light));
        }
    });
}

fn light_editor(ui: &mut Ui, index: usize, light: &mut Light) {
    ui.label(format!("#{index} {}", light.kind().label()));

    let mut color = light.color().to_array();
    ui.horizontal(|ui| {
        ui.label("Color");
        if ui.color_edit_button_rgb(&mut color).changed() {
            *light.color_mut() = color.into();
        }
    });
    ui.add(
        DragValue::new(light.intensity_mut())
            .speed(0.05)
            .range(0.0..=100.0)
            .prefix("Intensity: "),
    );
    if let Some(direction) = light.direction_mut() {
        vec3_row(ui, "Direction", direction, 0.01);
    }
    if let Some(position) = light.position_mut() {
        vec3_row(ui, "Position", position, 0.1);
    }
    if let Some(range) = light.range_mut() {
        ui.add(
            DragValue::new(range)
                .speed(0.1)
                .range(0.01..=1000.0)
                .prefix("Range: "),
        );
    }
    ui.separator();
}

fn camera(ui: &mut Ui, game: &mut Game) {
    CollapsingHeader::new("Camera").show(ui, |ui| {
        let Some(camera) = game.camera_mut() else {
            ui.label("No active camera");
            return;
        };
        let p = camera.position();
        ui.label(format!("Position: ({:.2}, {:.2}, {:.2})", p.x, p.y, p.z));

        let mut fov = camera.fov().to_degrees();
        if ui
            .add(Slider::new(&mut fov, 10.0..=120.0).text("FOV (deg)"))
            .changed()
        {
            camera.set_fov(fov.to_radians());
        }
        let mut move_speed = camera.move_speed();
        if ui
            .add(DragValue::new(&mut move_speed).speed(0.1).prefix("Move speed: "))
            .changed()
        {
            camera.set_move_speed(move_speed.max(0.0));
        }
        let mut look_speed = camera.look_speed();
        if ui
            .add(
                DragValue::new(&mut look_speed)
                    .speed(0.0001)
                    .prefix("Look speed: "),
            )
            .changed()
        {
            camera.set_look_speed(look_speed.max(0.0));
        }
    });
}

fn environment(ui: &mut Ui, game: &mut Game) {
    CollapsingHeader::new("Environment").show(ui, |ui| {
        ui.horizontal(|ui| {
            ui.label("Ambient");
            let mut ambient = game.ambient().to_array();
            if ui.color_edit_button_rgb(&mut ambient).changed() {
                game.set_ambient(ambient.into());
            }
        });
        let mut enabled = game.shadow().settings().enabled;
        if ui.checkbox(&mut enabled, "Shadows").changed() {
            game.shadow_mut().set_enabled(enabled);
        }
        if !game.shadow().is_casting() && enabled {
            ui.small("No directional light casts shadows");
        }
    });
}

/// Three drag values on one row. Returns true if any changed.
fn vec3_row(ui: &mut Ui, label: &str, value: &mut Vec3, speed: f64) -> bool {
    ui.label(label);
    ui.horizontal(|ui| {
        let x = ui.add(DragValue::new(&mut value.x).prefix("X: ").speed(speed));
        let y = ui.add(DragValue::new(&mut value.y).prefix("Y: ").speed(speed));
        let z = ui.add(DragValue::new(&mut value.z).prefix("Z: ").speed(speed));
        x.changed() || y.changed() || z.changed()
    })
    .inner
}

fn vec2_row(ui: &mut Ui, label: &str, value: &mut Vec2) -> bool {
    ui.horizontal(|ui| {
        ui.label(label);
        let x = ui.add(DragValue::new(&mut value.x).speed(0.01));
        let y = ui.add(DragValue::new(&mut value.y).speed(0.01));
        x.changed() || y.changed()
    })
    .inner
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::tests::game;

    fn run(panel: &mut InspectorPanel, game: &mut Game) {
        let ctx = egui::Context::default();
        let _ = ctx.run(egui::RawInput::default(), |ctx| panel.show(ctx, game));
    }

    #[test]
    fn panels_render_without_input() {
        let (mut game, _) = game();
        let before = game.entities()[0].transform().position();
        let mut panel = InspectorPanel::new();
        run(&mut panel, &mut game);
        assert_eq!(game.entities()[0].transform().position(), before);
        assert_eq!(panel.selected(), Some(0));
    }

    #[test]
    fn closed_panel_draws_nothing() {
        let (mut game, _) = game();
        let mut panel = InspectorPanel::new();
        panel.toggle();
        assert!(!panel.is_open());
        let ctx = egui::Context::default();
        let output = ctx.run(egui::RawInput::default(), |ctx| panel.show(ctx, &mut game));
        assert!(output.shapes.is_empty());
    }

    #[test]
    fn stale_selection_is_ignored() {
        let (mut game, _) = game();
        let mut panel = InspectorPanel::new();
        panel.select(Some(42));
        run(&mut panel, &mut game);
        assert_eq!(panel.selected(), Some(42));
    }

    #[test]
    fn scene_without_camera_still_shows() {
        let manifest =
            kiln_assets::Manifest::from_yaml_str("{}", std::path::Path::new("empty.yaml")).unwrap();
        let mut gfx = kiln_render::HeadlessContext::new(64, 64);
        let mut game =
            Game::build(&mut gfx, &manifest, kiln_render::RenderOptions::default()).unwrap();
        let mut panel = InspectorPanel::new();
        run(&mut panel, &mut game);
        assert!(game.camera().is_none());
    }
}
