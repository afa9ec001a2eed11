// Build script to compile the demo's GLSL shaders to SPIR-V

use std::path::Path;
use std::process::Command;

const SHADERS: &[(&str, &str)] = &[
    ("Shader/Demo1.vert", "Shader/Demo1.vert.spv"),
    ("Shader/Demo2.frag", "Shader/Demo2.frag.spv"),
];

fn main() {
    println!("cargo:rerun-if-changed=Shader/");

    for (input, output) in SHADERS {
        compile_shader(input, output);
    }
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    // Check if glslc is available
    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input, output);
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            // Nothing else produces the .spv; the demo exits with an asset
            // error until it exists
            if output_path.exists() {
                println!("cargo:warning=glslc not found ({}), keeping existing {}", e, output);
            } else {
                println!(
                    "cargo:warning=glslc not found ({}), {} is missing and the demo will not start",
                    e, output
                );
            }
            eprintln!("Install the Vulkan SDK or compile manually:");
            eprintln!("  glslc {} -o {}", input, output);
        }
    }
}
