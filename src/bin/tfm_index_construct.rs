use std::env;
use std::process;

use simple_sds_sbwt::serialize;
use simple_sds_sbwt::serialize::Serialize;
use tfmlib::TfmIndex;

fn print_usage(program: &str) {
    eprintln!("USAGE: {} FILE [TFMFILE]", program);
    eprintln!("FILE:");
    eprintln!("  Text to index; a zero-byte terminator is appended");
    eprintln!("TFMFILE:");
    eprintln!("  Where to store the serialized index (default FILE.tfm)");
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        eprintln!("At least 1 parameter expected");
        process::exit(1);
    }
    let infile = &args[1];
    let outfile = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| format!("{}.tfm", infile));

    let mut text = match std::fs::read(infile) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Unable to read {}: {}", infile, e);
            process::exit(1);
        }
    };
    if text.contains(&0) {
        eprintln!("{} contains a zero byte, which is reserved for the terminator", infile);
        process::exit(1);
    }
    text.push(0);

    let (tfm, stats) = TfmIndex::from_text(&text);
    println!(
        "order {} graph, {} nodes, {} of {} rows kept",
        stats.k,
        stats.nodes,
        tfm.l().len(),
        text.len()
    );

    if let Err(e) = serialize::serialize_to(&tfm, &outfile) {
        eprintln!("Unable to write {}: {}", outfile, e);
        process::exit(1);
    }
    println!("{} bytes written to {}", tfm.size_in_bytes(), outfile);
}
