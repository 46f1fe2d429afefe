use skein::command_argument_builder;
use skein::handlers::{
    handle_cache_clear, handle_cache_purge, handle_crawl, handle_policy_check, handle_policy_show,
    print_banner,
};

#[tokio::main]
async fn main() {
    // RUST_LOG controls verbosity
    tracing_subscriber::fmt::init();

    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    if !quiet {
        print_banner();
    }

    let result = match chosen_command.subcommand() {
        None => return,
        Some(("crawl", primary_command)) => handle_crawl(primary_command, quiet).await,
        Some(("policy", primary_command)) => match primary_command.subcommand() {
            Some(("check", secondary_command)) => handle_policy_check(secondary_command),
            Some(("show", secondary_command)) => handle_policy_show(secondary_command),
            _ => {
                println!("Usage: skein policy <check|show> --help");
                Ok(())
            }
        },
        Some(("cache", primary_command)) => match primary_command.subcommand() {
            Some(("purge", secondary_command)) => handle_cache_purge(secondary_command),
            Some(("clear", secondary_command)) => handle_cache_clear(secondary_command),
            _ => {
                println!("Usage: skein cache <purge|clear> --help");
                Ok(())
            }
        },
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}
