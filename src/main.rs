use std::process::exit;

fn main() {
    env_logger::init();

    match pipeshell::repl::run() {
        Ok(status) => exit(status),
        Err(err) => {
            eprintln!("pipeshell: {err:#}");
            exit(1);
        }
    }
}
