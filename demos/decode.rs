//! Decodes a baseline JPEG file to a binary PPM.

use std::{env, fs, io::Write, process};

use anyhow::Context;

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_module(env!("CARGO_PKG_NAME"), log::LevelFilter::Trace)
        .parse_default_env()
        .init();

    let args = env::args().skip(1).collect::<Vec<_>>();
    let [input, output] = &*args else {
        eprintln!("usage: decode <file.jpg> <file.ppm>");
        process::exit(1);
    };

    let jpeg = fs::read(input).with_context(|| format!("failed to read {input}"))?;
    let image = basejpeg::decode(&jpeg)?;

    if !image.comment().is_empty() {
        eprintln!("comment: {}", String::from_utf8_lossy(image.comment()));
    }

    let mut ppm = Vec::with_capacity(image.pixels().len() + 32);
    write!(ppm, "P6\n{} {}\n255\n", image.width(), image.height())?;
    ppm.extend_from_slice(image.pixels());
    fs::write(output, ppm).with_context(|| format!("failed to write {output}"))?;

    Ok(())
}
