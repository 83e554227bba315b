fn main() {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/job_worker.proto"], &["proto"])
        .unwrap_or_else(|e| panic!("failed to compile proto/job_worker.proto: {e}"));

    println!("cargo:rerun-if-changed=proto/job_worker.proto");
}
