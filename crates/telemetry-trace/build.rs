fn main() {
    prost_build::compile_protos(&["proto/otlp_trace.proto"], &["proto/"])
        .expect("failed to compile otlp_trace.proto");
}
