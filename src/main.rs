// src/main.rs

use parmake::errors::ParmakeError;
use parmake::jobs::signals;
use parmake::{cli, logging, run};

fn main() {
    match run_main() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            if let Some(ParmakeError::Interrupted(sig)) = err.downcast_ref::<ParmakeError>() {
                signals::redeliver(*sig);
            }
            eprintln!("parmake: *** {err:#}");
            std::process::exit(2);
        }
    }
}

fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    Ok(run(args)?)
}
