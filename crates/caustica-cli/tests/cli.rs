//! Drive the `caustica` binary end to end.

use std::path::Path;
use std::process::Command;

fn caustica() -> Command {
    Command::new(env!("CARGO_BIN_EXE_caustica"))
}

fn write_png(path: &Path, level: u8) {
    image::GrayImage::from_pixel(5, 5, image::Luma([level]))
        .save(path)
        .unwrap();
}

#[test]
fn test_legacy_flags_write_surface_and_maps() {
    let dir = tempfile::tempdir().unwrap();
    let (src, trg) = (dir.path().join("src.png"), dir.path().join("trg.png"));
    write_png(&src, 255);
    write_png(&trg, 128);
    let prefix = dir.path().join("out").join("lens");

    let output = caustica()
        .args(["-in_src", src.to_str().unwrap(), "-in_trg", trg.to_str().unwrap()])
        .args(["-res", "4", "-ores", "3", "-export_maps", "-v", "0"])
        .args(["-out", prefix.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("STATS solver -- init:"));
    for suffix in ["_3.obj", "_3_map.off", "_3_points.eps"] {
        let path = format!("{}{suffix}", prefix.display());
        assert!(Path::new(&path).exists(), "missing {path}");
    }
}

#[test]
fn test_text_on_black_background_designs_surface() {
    let dir = tempfile::tempdir().unwrap();
    let (src, trg) = (dir.path().join("src.png"), dir.path().join("text.png"));
    write_png(&src, 255);
    // A white "T" on black
    image::GrayImage::from_fn(32, 32, |x, y| {
        let bar = (6..26).contains(&x) && (22..27).contains(&y);
        let stem = (13..19).contains(&x) && (5..27).contains(&y);
        image::Luma([if bar || stem { 255u8 } else { 0 }])
    })
    .save(&trg)
    .unwrap();
    let prefix = dir.path().join("text");

    let output = caustica()
        .args(["-in_src", src.to_str().unwrap(), "-in_trg", trg.to_str().unwrap()])
        .args(["-res", "6", "-v", "0"])
        .args(["-out", prefix.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(Path::new(&format!("{}_1.obj", prefix.display())).exists());
}

#[test]
fn test_config_file_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let (src, trg) = (dir.path().join("src.png"), dir.path().join("trg.png"));
    write_png(&src, 90);
    write_png(&trg, 90);
    let report = dir.path().join("report.json");
    let config = dir.path().join("lens.toml");
    std::fs::write(
        &config,
        format!(
            "[input]\nsource = {:?}\ntarget = {:?}\n[mesh]\nresolution = 3\n\
             [output]\nprefix = {:?}\nresolutions = [1, 2]\nreport = {:?}\n",
            src.display().to_string(),
            trg.display().to_string(),
            dir.path().join("lens").display().to_string(),
            report.display().to_string(),
        ),
    )
    .unwrap();

    let output = caustica()
        .args(["-config", config.to_str().unwrap(), "-v", "0"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["passes"].as_array().unwrap().len(), 2);
    assert_eq!(json["mesh_resolution"], 3);
    assert!(dir.path().join("lens_2.obj").exists());
}

#[test]
fn test_missing_inputs_print_usage_and_fail() {
    let output = caustica().args(["-res", "4"]).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"));
    assert!(stderr.contains("in_src"));
}

#[test]
fn test_help_exits_cleanly() {
    for flag in ["-help", "-h"] {
        let output = caustica().arg(flag).output().unwrap();
        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains("in_trg"));
    }
}

#[test]
fn test_unreadable_density_fails() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.png");
    let output = caustica()
        .args(["-in_src", missing.to_str().unwrap(), "-in_trg", missing.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("source density"));
}
