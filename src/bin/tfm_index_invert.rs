use std::env;
use std::process;

use tfmlib::TfmIndex;

fn print_usage(program: &str) {
    eprintln!("USAGE: {} FILE", program);
    eprintln!("FILE:");
    eprintln!("  Base name of the tunneled index; FILE.L, FILE.din and");
    eprintln!("  FILE.dout must exist. The text is written to FILE.untunneled");
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        eprintln!("At least 1 parameter expected");
        process::exit(1);
    }
    let basename = &args[1];

    let tfm = match TfmIndex::load_pfwg(basename) {
        Ok(tfm) => tfm,
        Err(e) => {
            eprintln!("Unable to load {}: {}", basename, e);
            process::exit(1);
        }
    };

    let mut text = tfm.untunnel();
    text.pop(); // the terminator is not part of the original file

    let outfile = format!("{}.untunneled", basename);
    if let Err(e) = std::fs::write(&outfile, &text) {
        eprintln!("Unable to write {}: {}", outfile, e);
        process::exit(1);
    }
    println!("{} bytes written to {}", text.len(), outfile);
}
