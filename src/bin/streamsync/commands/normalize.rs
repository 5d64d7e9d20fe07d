use crate::cli::NormalizeArgs;
use crate::exit_codes;
use crate::output;

pub fn execute(args: NormalizeArgs, config_path: Option<&str>) -> i32 {
    let config = match output::load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let raw = match std::fs::read_to_string(&args.file) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error: Failed to read '{}': {}", args.file, e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let info = config.normalizer.build().normalize(&raw, args.channels);
    if info.synthetic {
        log::info!("No usable channel list in '{}', using placeholders", args.file);
    }

    if let Err(e) = output::emit_json(&info, args.compact, args.output.as_deref()) {
        eprintln!("Error: {}", e);
        return exit_codes::EXECUTION_ERROR;
    }

    exit_codes::SUCCESS
}
