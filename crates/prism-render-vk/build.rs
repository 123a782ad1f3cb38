use std::{env, fs, path::PathBuf};

use shaderc::ShaderKind;

// Vertex inputs must match `mesh::Vertex` (binding 0: location 0 position,
// location 1 color, both R32G32B32_SFLOAT). The uniform block must match
// `scene::SceneUniforms`.
const SCENE_VERT: &str = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inColor;

layout(set = 0, binding = 0) uniform SceneUniforms {
    mat4 model;
    mat4 view;
    mat4 proj;
} u;

layout(location = 0) out vec3 vColor;

void main() {
    vColor = inColor;
    gl_Position = u.proj * u.view * u.model * vec4(inPos, 1.0);
}
"#;

const SCENE_FRAG: &str = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0);
}
"#;

/// Source name, stage and GLSL. Each lands in `OUT_DIR` as `<name>.spv`.
const SHADERS: &[(&str, ShaderKind, &str)] = &[
    ("scene.vert", ShaderKind::Vertex, SCENE_VERT),
    ("scene.frag", ShaderKind::Fragment, SCENE_FRAG),
];

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("cargo sets OUT_DIR for build scripts"));

    let compiler = shaderc::Compiler::new().expect("initialising shaderc");
    let mut opts = shaderc::CompileOptions::new().expect("creating shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for &(name, kind, src) in SHADERS {
        let spirv = compiler
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("compiling {name}: {e}"));
        let path = out.join(format!("{name}.spv"));
        fs::write(&path, spirv.as_binary_u8())
            .unwrap_or_else(|e| panic!("writing {}: {e}", path.display()));
    }

    println!("cargo:rerun-if-changed=build.rs");
}
