fn main() {
    vergen::EmitBuilder::builder()
        .build_timestamp()
        .rustc_semver()
        .rustc_host_triple()
        .cargo_target_triple()
        .cargo_opt_level()
        .emit()
        .unwrap();
}
