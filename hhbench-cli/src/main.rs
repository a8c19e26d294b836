fn main() {
    if let Err(e) = hhbench_cli::run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
