use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

    // Vertex shader: no vertex buffers, the triangle comes from gl_VertexIndex.
    let vs_src = r#"
#version 450
layout(location = 0) out vec3 vColor;

const vec2 POS[3] = vec2[](vec2(0.0, -0.6), vec2(-0.5, 0.4), vec2(0.5, 0.4));
const vec3 COL[3] = vec3[](vec3(1.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0), vec3(0.0, 0.0, 1.0));

void main() {
    vColor = COL[gl_VertexIndex];
    gl_Position = vec4(POS[gl_VertexIndex], 0.0, 1.0);
}
"#;

    // Fragment shader: vertex color modulated by a push-constant tint.
    let fs_src = r#"
#version 450
layout(push_constant) uniform Tint { vec4 tint; } pc;
layout(location = 0) in vec3 vColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0) * pc.tint;
}
"#;

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (src, kind, name, file) in [
        (vs_src, shaderc::ShaderKind::Vertex, "tri.vert", "tri.vert.spv"),
        (fs_src, shaderc::ShaderKind::Fragment, "tri.frag", "tri.frag.spv"),
    ] {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        fs::write(out.join(file), spv.as_binary_u8()).expect("write spirv");
    }

    // Re-run if this file changes (inline sources live here)
    println!("cargo:rerun-if-changed=build.rs");
}
