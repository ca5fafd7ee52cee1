//! Builtin WGSL programs, one per stage.
//!
//! Scene manifests reference these as `builtin:<name>`.

/// Vertex stage of the lit forward pass.
pub const LIT_VS: &str = r#"
struct VertexParams {
    world: mat4x4<f32>,
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    world_inverse_transpose: mat4x4<f32>,
    light_view: mat4x4<f32>,
    light_projection: mat4x4<f32>,
};

@group(0) @binding(0)
var<uniform> params: VertexParams;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) normal: vec3<f32>,
    @location(3) tangent: vec3<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) normal: vec3<f32>,
    @location(3) tangent: vec3<f32>,
    @location(4) light_space: vec4<f32>,
};

@vertex
fn vs_main(vin: VertexInput) -> VertexOutput {
    let world_pos = params.world * vec4<f32>(vin.position, 1.0);

    var out: VertexOutput;
    out.clip_position = params.projection * params.view * world_pos;
    out.world_position = world_pos.xyz;
    out.uv = vin.uv;
    out.normal = normalize((params.world_inverse_transpose * vec4<f32>(vin.normal, 0.0)).xyz);
    out.tangent = normalize((params.world * vec4<f32>(vin.tangent, 0.0)).xyz);
    out.light_space = params.light_projection * params.light_view * world_pos;
    return out;
}
"#;

/// Pixel stage of the lit forward pass: Lambert diffuse, Phong specular scaled by
/// roughness, range attenuation, spot cones, and a PCF shadow lookup for the
/// dominant directional light.
pub const LIT_PS: &str = r#"
const LIGHT_DIRECTIONAL: u32 = 0u;
const LIGHT_SPOT: u32 = 2u;
const MAX_SPECULAR_EXPONENT: f32 = 256.0;

struct Light {
    kind: u32,
    range: f32,
    intensity: f32,
    spot_inner: f32,
    direction: vec3<f32>,
    spot_outer: f32,
    position: vec3<f32>,
    pad0: f32,
    color: vec3<f32>,
    pad1: f32,
};

struct PixelParams {
    color_tint: vec4<f32>,
    uv_scale: vec2<f32>,
    uv_offset: vec2<f32>,
    camera_position: vec3<f32>,
    roughness: f32,
    ambient_color: vec3<f32>,
    time: f32,
    light_count: u32,
    shadow_light_index: u32,
    lights: array<Light, 8>,
};

@group(1) @binding(0) var<uniform> params: PixelParams;
@group(1) @binding(1) var albedo: texture_2d<f32>;
@group(1) @binding(2) var basic_sampler: sampler;
@group(1) @binding(3) var shadow_map: texture_depth_2d;
@group(1) @binding(4) var shadow_sampler: sampler_comparison;

struct FragmentInput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) normal: vec3<f32>,
    @location(3) tangent: vec3<f32>,
    @location(4) light_space: vec4<f32>,
};

fn attenuate(light: Light, world_position: vec3<f32>) -> f32 {
    let dist = distance(light.position, world_position);
    let att = saturate(1.0 - (dist * dist) / (light.range * light.range));
    return att * att;
}

fn specular(normal: vec3<f32>, to_light: vec3<f32>, to_camera: vec3<f32>, roughness: f32) -> f32 {
    let exponent = (1.0 - roughness) * MAX_SPECULAR_EXPONENT;
    if (exponent < 0.05) {
        return 0.0;
    }
    let reflected = reflect(-to_light, normal);
    return pow(saturate(dot(reflected, to_camera)), exponent);
}

fn shadow_factor(light_space: vec4<f32>) -> f32 {
    let ndc = light_space.xyz / light_space.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, -ndc.y * 0.5 + 0.5);
    if (uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0 || ndc.z > 1.0) {
        return 1.0;
    }
    return textureSampleCompareLevel(shadow_map, shadow_sampler, uv, ndc.z);
}

@fragment
fn fs_main(fin: FragmentInput) -> @location(0) vec4<f32> {
    let uv = fin.uv * params.uv_scale + params.uv_offset;
    let surface = textureSample(albedo, basic_sampler, uv).rgb * params.color_tint.rgb;
    let normal = normalize(fin.normal);
    let to_camera = normalize(params.camera_position - fin.world_position);
    let shadow = shadow_factor(fin.light_space);

    var total = params.ambient_color * surface;
    let count = min(params.light_count, 8u);
    for (var i = 0u; i < count; i = i + 1u) {
        let light = params.lights[i];
        var to_light: vec3<f32>;
        var strength = light.intensity;
        if (light.kind == LIGHT_DIRECTIONAL) {
            to_light = normalize(-light.direction);
        } else {
            to_light = normalize(light.position - fin.world_position);
            strength = strength * attenuate(light, fin.world_position);
            if (light.kind == LIGHT_SPOT) {
                let cos_angle = dot(-to_light, normalize(light.direction));
                let cos_outer = cos(light.spot_outer);
                let cos_inner = cos(light.spot_inner);
                strength = strength * saturate((cos_angle - cos_outer) / max(cos_inner - cos_outer, 0.0001));
            }
        }
        var lit = saturate(dot(normal, to_light)) * surface
            + vec3<f32>(specular(normal, to_light, to_camera, params.roughness));
        if (i == params.shadow_light_index) {
            lit = lit * shadow;
        }
        total = total + lit * light.color * strength;
    }
    return vec4<f32>(total, params.color_tint.a);
}
"#;

/// Depth-only vertex stage for the shadow pass.
pub const SHADOW_VS: &str = r#"
struct ShadowParams {
    world_view_projection: mat4x4<f32>,
};

@group(0) @binding(0)
var<uniform> params: ShadowParams;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return params.world_view_projection * vec4<f32>(position, 1.0);
}
"#;

/// Sky vertex stage. Outputs z = w so the sky lands on the far plane.
pub const SKY_VS: &str = r#"
struct SkyParams {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
};

@group(0) @binding(0)
var<uniform> params: SkyParams;

struct SkyOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) direction: vec3<f32>,
};

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> SkyOutput {
    let clip = params.projection * params.view * vec4<f32>(position, 1.0);

    var out: SkyOutput;
    out.clip_position = clip.xyww;
    out.direction = position;
    return out;
}
"#;

pub const SKY_PS: &str = r#"
@group(1) @binding(0) var sky_texture: texture_cube<f32>;
@group(1) @binding(1) var sky_sampler: sampler;

@fragment
fn fs_main(@location(0) direction: vec3<f32>) -> @location(0) vec4<f32> {
    return textureSample(sky_texture, sky_sampler, direction);
}
"#;

/// Flat colour, no lighting. Pairs with `LIT_VS`.
pub const UNLIT_PS: &str = r#"
struct PixelParams {
    color_tint: vec4<f32>,
};

@group(1) @binding(0)
var<uniform> params: PixelParams;

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return params.color_tint;
}
"#;

/// Look up a builtin program by manifest name.
pub fn builtin(name: &str) -> Option<&'static str> {
    match name {
        "lit_vs" => Some(LIT_VS),
        "lit_ps" => Some(LIT_PS),
        "shadow_vs" => Some(SHADOW_VS),
        "sky_vs" => Some(SKY_VS),
        "sky_ps" => Some(SKY_PS),
        "unlit_ps" => Some(UNLIT_PS),
        _ => None,
    }
}

/// Names of every builtin program.
pub const BUILTIN_NAMES: [&str; 6] = ["lit_vs", "lit_ps", "shadow_vs", "sky_vs", "sky_ps", "unlit_ps"];
