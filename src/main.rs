use benchlink_cli::handlers;

fn main() {
    env_logger::init();
    let matches = benchlink_cli::parse_args();

    let outcome = if matches.get_flag("list-ports") {
        handlers::handle_list_ports().map(|_| true)
    } else if matches.get_flag("list-profiles") {
        handlers::handle_list_profiles(&matches).map(|_| true)
    } else if matches.get_flag("init-profiles") {
        handlers::handle_init_profiles(&matches).map(|_| true)
    } else if let Some(sequence_file) = matches.get_one::<String>("run") {
        handlers::handle_run(&matches, sequence_file)
    } else {
        eprintln!("Nothing to do; try --help");
        std::process::exit(2);
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            log::error!("{err:#}");
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}
