use std::error::Error;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use ftlink::{
    InputMode, MotorDirection, OutputMode, Protocol, Session, SessionConfig, SessionEvent,
    TXT_WIFI_ADDRESS, TxtSession,
};
#[cfg(feature = "serial")]
use ftlink::TxSession;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let Some(mode) = args.next() else {
        print_usage();
        return Ok(());
    };

    match mode.as_str() {
        "txt" => {
            let address = args.next().unwrap_or_else(|| TXT_WIFI_ADDRESS.to_string());
            let session = TxtSession::tcp(SessionConfig::default())?;
            run_example(&session, &address)
        }
        "tx" => {
            #[cfg(feature = "serial")]
            {
                let Some(port) = args.next() else {
                    print_usage();
                    return Ok(());
                };
                let session = TxSession::serial(SessionConfig::default())?;
                run_example(&session, &port)
            }
            #[cfg(not(feature = "serial"))]
            {
                Err("built without `serial` feature".into())
            }
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn run_example<P: Protocol>(session: &Session<P>, address: &str) -> Result<(), Box<dyn Error>> {
    let (_, events) = session.subscribe_channel();

    session.connect(address)?;
    if let Some(info) = session.controller_info() {
        println!("Connected to {} (firmware {})", info.name, info.version);
    }

    session.configure_input_mode(0, InputMode::Resistance, true)?;
    session.configure_output_mode(0, OutputMode::Motor)?;
    session.start_online()?;

    session.set_motor_value(0, 256, MotorDirection::Left)?;
    thread::sleep(Duration::from_secs(1));
    session.set_motor_direction(0, MotorDirection::Right)?;

    let until = std::time::Instant::now() + Duration::from_secs(2);
    while let Some(remaining) = until.checked_duration_since(std::time::Instant::now()) {
        match events.recv_timeout(remaining) {
            Ok(SessionEvent::InputValueChanged(changed)) => {
                for index in changed {
                    println!("I{} = {}", index + 1, session.input_value(index)?);
                }
            }
            Ok(SessionEvent::ConnectionLost) => return Err("connection lost".into()),
            Ok(_) => {}
            Err(_) => break,
        }
    }

    session.stop_online()?;
    session.disconnect()?;
    Ok(())
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run --example txt_online -- txt [ADDRESS]");
    eprintln!("  cargo run --example txt_online --features serial -- tx <RFCOMM_PORT>");
}
