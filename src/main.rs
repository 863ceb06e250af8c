use std::process::ExitCode;

fn main() -> ExitCode {
    match chat_playlist_explorer::cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
