// Plugin - Node types loaded from dynamic libraries
//
// A plugin library exports three C ABI entry points:
//
//   blueprint_plugin_version() -> i32           engine version it was built for
//   blueprint_plugin_create() -> *mut NodeTypeInfo
//   blueprint_plugin_destroy(*mut NodeTypeInfo)
//
// `export_blueprint_plugin!` generates them for a `#[blueprint_node]` type.
// The host clones the descriptor and hands the original back to the plugin.

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use blueprint_types::{NodeType, VERSION_BLUEPRINT};

use crate::node::NodeTypeInfo;

const VERSION_SYMBOL: &[u8] = b"blueprint_plugin_version";
const CREATE_SYMBOL: &[u8] = b"blueprint_plugin_create";
const DESTROY_SYMBOL: &[u8] = b"blueprint_plugin_destroy";

type VersionFn = unsafe extern "C" fn() -> i32;
type CreateFn = unsafe extern "C" fn() -> *mut NodeTypeInfo;
type DestroyFn = unsafe extern "C" fn(*mut NodeTypeInfo);

/// Errors raised while loading plugin libraries
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Failed to load plugin library {path}: {source}")]
    Library {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("Plugin {path} does not export {symbol}: {source}")]
    MissingSymbol {
        path: PathBuf,
        symbol: String,
        #[source]
        source: libloading::Error,
    },

    #[error("Plugin {path} was built for blueprint version {found:#010x}, engine is {expected:#010x}")]
    VersionMismatch { path: PathBuf, found: u32, expected: u32 },

    #[error("Plugin {path} returned no node type")]
    NullTypeInfo { path: PathBuf },

    #[error("Failed to read plugin directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A loaded plugin library, kept alive while its node types are in use
pub struct PluginLibrary {
    path: PathBuf,
    _library: Library,
}

impl PluginLibrary {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reject a plugin built against another engine version
pub(crate) fn check_version(path: &Path, found: i32) -> Result<(), PluginError> {
    let found = found as u32;
    if found != VERSION_BLUEPRINT {
        return Err(PluginError::VersionMismatch {
            path: path.to_path_buf(),
            found,
            expected: VERSION_BLUEPRINT,
        });
    }
    Ok(())
}

/// Load a plugin library and take a copy of the node type it provides
pub(crate) fn load(path: &Path) -> Result<(NodeTypeInfo, PluginLibrary), PluginError> {
    let library = unsafe { Library::new(path) }.map_err(|source| PluginError::Library {
        path: path.to_path_buf(),
        source,
    })?;

    let missing = |symbol: &[u8], source| PluginError::MissingSymbol {
        path: path.to_path_buf(),
        symbol: String::from_utf8_lossy(symbol).into_owned(),
        source,
    };

    let mut info = {
        let version: Symbol<VersionFn> =
            unsafe { library.get(VERSION_SYMBOL) }.map_err(|e| missing(VERSION_SYMBOL, e))?;
        check_version(path, unsafe { version() })?;

        let create: Symbol<CreateFn> =
            unsafe { library.get(CREATE_SYMBOL) }.map_err(|e| missing(CREATE_SYMBOL, e))?;
        let destroy: Symbol<DestroyFn> =
            unsafe { library.get(DESTROY_SYMBOL) }.map_err(|e| missing(DESTROY_SYMBOL, e))?;

        let raw = unsafe { create() };
        if raw.is_null() {
            return Err(PluginError::NullTypeInfo {
                path: path.to_path_buf(),
            });
        }
        let info = unsafe { (*raw).clone() };
        unsafe { destroy(raw) };
        info
    };

    if info.node_type == NodeType::Internal {
        info.node_type = NodeType::External;
    }
    Ok((
        info,
        PluginLibrary {
            path: path.to_path_buf(),
            _library: library,
        },
    ))
}

/// Library files in `dir` carrying the platform's dynamic library extension
pub(crate) fn discover(dir: &Path) -> Result<Vec<PathBuf>, PluginError> {
    let io_error = |source| PluginError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.extension().is_some_and(|ext| ext == std::env::consts::DLL_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Export a node type from a plugin library
///
/// ```ignore
/// blueprint_runtime::export_blueprint_plugin!(MyFilterNode);
/// ```
#[macro_export]
macro_rules! export_blueprint_plugin {
    ($node:ty) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn blueprint_plugin_version() -> i32 {
            $crate::blueprint_types::VERSION_BLUEPRINT as i32
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn blueprint_plugin_create() -> *mut $crate::NodeTypeInfo {
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(<$node>::node_type_info()))
        }

        /// # Safety
        /// `info` must come from `blueprint_plugin_create` of this library.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn blueprint_plugin_destroy(info: *mut $crate::NodeTypeInfo) {
            if !info.is_null() {
                drop(unsafe { ::std::boxed::Box::from_raw(info) });
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_types::version_pack;

    #[test]
    fn test_version_check() {
        let path = Path::new("libplugin.so");
        assert!(check_version(path, VERSION_BLUEPRINT as i32).is_ok());

        let older = version_pack(1, 1, 0, 0);
        match check_version(path, older as i32) {
            Err(PluginError::VersionMismatch { found, expected, .. }) => {
                assert_eq!(found, older);
                assert_eq!(expected, VERSION_BLUEPRINT);
            }
            other => panic!("expected version mismatch, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_load_rejects_non_library() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("broken.{}", std::env::consts::DLL_EXTENSION));
        std::fs::write(&path, b"not a library").unwrap();

        assert_eq!(discover(dir.path()).unwrap(), vec![path.clone()]);
        assert!(matches!(load(&path), Err(PluginError::Library { .. })));
    }
}
