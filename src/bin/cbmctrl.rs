extern crate cbmbus;
extern crate clap;
extern crate env_logger;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use std::io::{self, IsTerminal, Write};
use std::process;

use cbmbus::drive::{self, DeviceType};
use cbmbus::image::Image;
use cbmbus::{memory, AdapterSpec, CbmError, Hex, IecLines, Session};

// Possible exit codes
static _EXIT_SUCCESS: i32 = 0;
static EXIT_FAILURE: i32 = 1;

/// If a dash is specified for a filename, this indicates that the user wants
/// to read from standard input or write to standard output.
static STDINOUT_PSEUDOFILENAME: &str = "-";

/// Device numbers probed by `detect`.
const DETECT_RANGE: std::ops::RangeInclusive<u8> = 8..=30;

fn device_arg() -> Arg<'static, 'static> {
    Arg::with_name("device")
        .required(true)
        .validator(device_validator)
        .help("Device number (0-30)")
}

fn secondary_arg() -> Arg<'static, 'static> {
    Arg::with_name("secondary")
        .required(true)
        .validator(secondary_validator)
        .help("Secondary address (0-15)")
}

fn lines_arg() -> Arg<'static, 'static> {
    Arg::with_name("lines")
        .required(true)
        .multiple(true)
        .possible_values(&["data", "clock", "atn", "reset"])
        .help("Bus lines")
}

fn main() {
    // Parse command-line arguments
    let app = App::new("Commodore Serial Bus Control")
        .version("0.1.0")
        .about("Operate Commodore serial-bus devices through a USB adapter.")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("adapter")
                .short("a")
                .long("adapter")
                .takes_value(true)
                .validator(adapter_validator)
                .help("Adapter to use, as name[:port]"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Log more detail"),
        )
        .subcommand(SubCommand::with_name("detect").about("List the devices on the bus"))
        .subcommand(SubCommand::with_name("reset").about("Reset every device on the bus"))
        .subcommand(
            SubCommand::with_name("listen")
                .about("Send LISTEN to a device")
                .arg(device_arg())
                .arg(secondary_arg()),
        )
        .subcommand(
            SubCommand::with_name("talk")
                .about("Send TALK to a device")
                .arg(device_arg())
                .arg(secondary_arg()),
        )
        .subcommand(SubCommand::with_name("unlisten").about("Send UNLISTEN"))
        .subcommand(SubCommand::with_name("untalk").about("Send UNTALK"))
        .subcommand(
            SubCommand::with_name("open")
                .about("Open a channel, optionally with a file name")
                .arg(device_arg())
                .arg(secondary_arg())
                .arg(Arg::with_name("filename").required(false)),
        )
        .subcommand(
            SubCommand::with_name("close")
                .about("Close a channel")
                .arg(device_arg())
                .arg(secondary_arg()),
        )
        .subcommand(
            SubCommand::with_name("status")
                .about("Show the drive status")
                .arg(device_arg()),
        )
        .subcommand(
            SubCommand::with_name("command")
                .about("Send a DOS command")
                .arg(device_arg())
                .arg(Arg::with_name("command").required(true)),
        )
        .subcommand(
            SubCommand::with_name("identify")
                .about("Identify the drive model")
                .arg(device_arg()),
        )
        .subcommand(SubCommand::with_name("lines").about("Show the state of the bus lines"))
        .subcommand(
            SubCommand::with_name("set")
                .about("Pull bus lines active")
                .arg(lines_arg()),
        )
        .subcommand(
            SubCommand::with_name("release")
                .about("Release bus lines")
                .arg(lines_arg()),
        )
        .subcommand(
            SubCommand::with_name("upload")
                .about("Write a file into drive memory")
                .arg(device_arg())
                .arg(
                    Arg::with_name("address")
                        .required(true)
                        .validator(address_validator)
                        .help("Drive memory address, in hex"),
                )
                .arg(Arg::with_name("source_filename").required(true)),
        )
        .subcommand(
            SubCommand::with_name("download")
                .about("Read drive memory into a file")
                .arg(device_arg())
                .arg(
                    Arg::with_name("address")
                        .required(true)
                        .validator(address_validator)
                        .help("Drive memory address, in hex"),
                )
                .arg(
                    Arg::with_name("count")
                        .required(true)
                        .validator(count_validator)
                        .help("Number of bytes"),
                )
                .arg(Arg::with_name("destination_filename").required(false)),
        )
        .subcommand(
            SubCommand::with_name("tape-break").about("Abort the running datasette operation"),
        );

    let mut app_clone = app.clone();
    let matches = app.get_matches();

    init_logging(matches.occurrences_of("verbose"));

    let spec = match matches.value_of("adapter") {
        Some(text) => parse_adapter(text),
        None => AdapterSpec::default(),
    };
    let mut session = match Session::connect(&spec) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error: cannot open adapter: {}", e);
            process::exit(EXIT_FAILURE);
        }
    };

    let s = &mut session;
    let result = match matches.subcommand() {
        ("detect", Some(_)) => cmd_detect(s),
        ("reset", Some(_)) => s.reset(),
        ("listen", Some(m)) => s.listen(device(m), secondary(m)),
        ("talk", Some(m)) => s.talk(device(m), secondary(m)),
        ("unlisten", Some(_)) => s.unlisten(),
        ("untalk", Some(_)) => s.untalk(),
        ("open", Some(m)) => s.open(
            device(m),
            secondary(m),
            m.value_of("filename").map(str::as_bytes),
        ),
        ("close", Some(m)) => s.close_channel(device(m), secondary(m)),
        ("status", Some(m)) => cmd_status(s, device(m)),
        ("command", Some(m)) => cmd_command(s, device(m), m.value_of("command").unwrap()),
        ("identify", Some(m)) => cmd_identify(s, device(m)),
        ("lines", Some(_)) => cmd_lines(s),
        ("set", Some(m)) => s.iec_set(lines(m)),
        ("release", Some(m)) => s.iec_release(lines(m)),
        ("upload", Some(m)) => cmd_upload(
            s,
            device(m),
            address(m),
            m.value_of("source_filename").unwrap(),
        ),
        ("download", Some(m)) => cmd_download(
            s,
            device(m),
            address(m),
            count_parser(m.value_of("count").unwrap()).unwrap(),
            m.value_of("destination_filename"),
        ),
        ("tape-break", Some(_)) => s.tape().and_then(|tape| tape.tap_break()),
        _ => {
            app_clone.print_help().unwrap();
            println!();
            process::exit(EXIT_FAILURE);
        }
    };
    session.close();
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        if CbmError::from_io_error(&e).map_or(false, |e| e.is_mode_violation()) {
            eprintln!("The adapter picks disk or tape mode when it is opened; reopen it in the other mode.");
        }
        process::exit(EXIT_FAILURE);
    }
}

fn init_logging(verbosity: u64) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn parse_adapter(text: &str) -> AdapterSpec {
    text.parse().unwrap()
}

fn adapter_validator(v: String) -> Result<(), String> {
    v.parse::<AdapterSpec>()
        .map(|_| ())
        .map_err(|_| "Expected an adapter as name[:port].".to_string())
}

fn u8_parser(v: &str, min: u8, max: u8) -> Result<u8, ()> {
    match v.parse::<u8>() {
        Ok(n) if n >= min && n <= max => Ok(n),
        _ => Err(()),
    }
}

fn u8_validator(v: String, min: u8, max: u8) -> Result<(), String> {
    u8_parser(&v, min, max)
        .map(|_| ())
        .map_err(|_| format!("Expected a value from {}-{}.", min, max))
}

fn device_validator(v: String) -> Result<(), String> {
    u8_validator(v, 0, 30)
}

fn secondary_validator(v: String) -> Result<(), String> {
    u8_validator(v, 0, 15)
}

fn device(m: &ArgMatches) -> u8 {
    u8_parser(m.value_of("device").unwrap(), 0, 30).unwrap()
}

fn secondary(m: &ArgMatches) -> u8 {
    u8_parser(m.value_of("secondary").unwrap(), 0, 15).unwrap()
}

/// Accept `0300`, `$0300`, or `0x0300`.
fn address_parser(v: &str) -> Result<u16, ()> {
    let digits = v
        .trim_start_matches('$')
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|_| ())
}

fn address_validator(v: String) -> Result<(), String> {
    address_parser(&v)
        .map(|_| ())
        .map_err(|_| "Expected a hexadecimal address from 0000-ffff.".to_string())
}

fn address(m: &ArgMatches) -> u16 {
    address_parser(m.value_of("address").unwrap()).unwrap()
}

fn count_parser(v: &str) -> Result<usize, ()> {
    match v.parse::<usize>() {
        Ok(n) if n >= 1 && n <= 0x10000 => Ok(n),
        _ => Err(()),
    }
}

fn count_validator(v: String) -> Result<(), String> {
    count_parser(&v)
        .map(|_| ())
        .map_err(|_| "Expected a byte count from 1-65536.".to_string())
}

fn lines(m: &ArgMatches) -> IecLines {
    m.values_of("lines")
        .unwrap()
        .filter_map(IecLines::from_line_name)
        .fold(IecLines::empty(), |all, line| all | line)
}

fn cmd_detect(session: &mut Session) -> io::Result<()> {
    println!("{}", session.driver_name()?);
    for device in DETECT_RANGE {
        match drive::identify(session, device) {
            Ok(identity) => {
                let kind = match identity.device_type {
                    DeviceType::Unknown => "unknown",
                    _ => "CBM drive",
                };
                println!("{:>2}: {} ({})", device, identity, kind);
            }
            Err(ref e) if CbmError::from_io_error(e) == Some(CbmError::BusError) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn cmd_status(session: &mut Session, device: u8) -> io::Result<()> {
    println!("{}", drive::device_status(session, device));
    Ok(())
}

fn cmd_command(session: &mut Session, device: u8, command: &str) -> io::Result<()> {
    // CBM DOS expects unshifted PETSCII, which matches upper-case ASCII.
    drive::exec_command(session, device, command.to_ascii_uppercase().as_bytes())
}

fn cmd_identify(session: &mut Session, device: u8) -> io::Result<()> {
    let identity = drive::identify(session, device)?;
    println!("{}", identity);
    Ok(())
}

fn cmd_lines(session: &mut Session) -> io::Result<()> {
    let state = session.iec_poll()?;
    for (name, line) in [
        ("DATA", IecLines::DATA),
        ("CLOCK", IecLines::CLOCK),
        ("ATN", IecLines::ATN),
        ("RESET", IecLines::RESET),
    ] {
        println!("{:<5} {}", name, if state.contains(line) { 1 } else { 0 });
    }
    Ok(())
}

fn cmd_upload(session: &mut Session, device: u8, address: u16, source: &str) -> io::Result<()> {
    let image = if source == STDINOUT_PSEUDOFILENAME {
        Image::from_reader(io::stdin())?
    } else {
        Image::open_read_only(source)?
    };
    if address as usize + image.len() > 0x10000 {
        return Err(CbmError::InvalidArgument.into());
    }
    let written = memory::upload(session, device, address, image.as_slice())?;
    eprintln!("{} bytes written at ${:04x}", written, address);
    Ok(())
}

fn cmd_download(
    session: &mut Session,
    device: u8,
    address: u16,
    count: usize,
    destination: Option<&str>,
) -> io::Result<()> {
    if address as usize + count > 0x10000 {
        return Err(CbmError::InvalidArgument.into());
    }
    match destination {
        Some(path) if path != STDINOUT_PSEUDOFILENAME => {
            let mut image = Image::create(path, count, false)?;
            memory::download(session, device, address, image.as_mut_slice()?)?;
            image.flush()
        }
        _ => {
            let mut image = Image::open_memory(count);
            let n = memory::download(session, device, address, image.as_mut_slice()?)?;
            let data = &image.as_slice()[..n];
            let stdout = io::stdout();
            let mut stdout = stdout.lock();
            if stdout.is_terminal() {
                writeln!(stdout, "{}", Hex::at(address as usize, data))?;
            } else {
                stdout.write_all(data)?;
            }
            stdout.flush()
        }
    }
}
