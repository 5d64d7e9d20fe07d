use crate::cli::BindingsArgs;
use crate::exit_codes;
use crate::output;
use std::path::PathBuf;
use streamsync::StreamBinding;

pub fn execute(args: BindingsArgs, config_path: Option<&str>) -> i32 {
    let path = match &args.file {
        Some(file) => PathBuf::from(file),
        None => match output::load_config(config_path).and_then(|c| {
            c.bindings_path().map_err(|e| e.to_string())
        }) {
            Ok(path) => path,
            Err(e) => {
                eprintln!("Error: {}", e);
                return exit_codes::INPUT_ERROR;
            }
        },
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error: Failed to read '{}': {}", path.display(), e);
            return exit_codes::INPUT_ERROR;
        }
    };
    let bindings: Vec<StreamBinding> = match serde_json::from_str(&content) {
        Ok(bindings) => bindings,
        Err(e) => {
            eprintln!("Error: '{}' is not a binding file: {}", path.display(), e);
            return exit_codes::INPUT_ERROR;
        }
    };

    if args.json {
        if let Err(e) = output::emit_json(&bindings, false, None) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
        return exit_codes::SUCCESS;
    }

    if bindings.is_empty() {
        println!("No bindings in {}", path.display());
        return exit_codes::SUCCESS;
    }

    println!("Bindings in {}:\n", path.display());
    for binding in &bindings {
        println!("  {}", binding.summary());
        println!(
            "    stream: {} [{}], {} Hz",
            binding.descriptor.name, binding.descriptor.source_id, binding.sample_rate
        );
        println!("    labels: {}", binding.labels.join(", "));
    }

    exit_codes::SUCCESS
}
