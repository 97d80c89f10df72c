use std::process::ExitCode;

use clap::Parser;

use mqrelay::{Args, fake_broker_connector, real_broker_connector, run_with_log_level};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let log_level = args.log_level();
        let broker_settings = args.broker_settings();
        let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
        let connector = match maybe_fake_args {
            Some(fake_args) => fake_broker_connector(fake_args),
            None => real_broker_connector(broker_settings),
        };

        run_with_log_level(command, &mut stdout, connector, log_level).await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
