use std::sync::Once;

use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
use tracing::{debug, warn};

/// Load the libtorch CUDA libraries globally so TorchScript modules can reach
/// the GPU kernels. Runs at most once per process.
pub fn preload_cuda_runtime(verbose: bool) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let mut handles = Vec::new();
        for lib in [
            "libtorch_cuda.so",
            "libtorch_cuda_cu.so",
            "libtorch_cuda_cpp.so",
        ] {
            match unsafe { Library::open(Some(lib), RTLD_NOW | RTLD_GLOBAL) } {
                Ok(handle) => {
                    debug!("ml-core: loaded {lib}");
                    handles.push(handle);
                }
                Err(err) => {
                    if verbose {
                        warn!("ml-core: failed to load {lib}: {err}");
                    }
                }
            }
        }
        Box::leak(Box::new(handles));
    });
}
