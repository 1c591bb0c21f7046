fn main() {
    // FFmpeg is only linked when the decoder is compiled in
    if std::env::var_os("CARGO_FEATURE_FFMPEG").is_none() {
        return;
    }

    // Configure FFmpeg paths for macOS (Homebrew installation)
    #[cfg(target_os = "macos")]
    {
        if std::path::Path::new("/opt/homebrew/lib").exists() {
            println!("cargo:rustc-link-search=/opt/homebrew/lib");
            println!("cargo:rustc-link-lib=dylib=avcodec");
            println!("cargo:rustc-link-lib=dylib=avformat");
            println!("cargo:rustc-link-lib=dylib=avutil");
            println!("cargo:rustc-link-lib=dylib=swscale");
        }
    }

    println!("cargo:rerun-if-changed=build.rs");
}
