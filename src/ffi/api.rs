//! Native capability table
//!
//! Every entry point the lifecycle needs is resolved once, right after the
//! module is loaded, into a table of typed function pointers. A missing
//! required symbol fails the bootstrap with [`TclError::AbiUnavailable`];
//! a missing optional one only fails the operation that needs it.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};

use super::loader::NativeModule;
use crate::error::{TclError, TclResult};
use crate::version::{PatchLevel, ReleaseLevel};

/// Opaque native interpreter.
#[repr(C)]
pub struct TclInterp {
    _private: [u8; 0],
}

pub const TCL_OK: c_int = 0;
pub const TCL_ERROR: c_int = 1;
pub const TCL_GLOBAL_ONLY: c_int = 1;
pub const TCL_DONT_WAIT: c_int = 1 << 1;
pub const TCL_ALL_EVENTS: c_int = !TCL_DONT_WAIT;
pub const TCL_CANCEL_UNWIND: c_int = 0x0010_0000;

pub type GetVersionFn = unsafe extern "C" fn(*mut c_int, *mut c_int, *mut c_int, *mut c_int);
pub type FindExecutableFn = unsafe extern "C" fn(*const c_char);
pub type CreateInterpFn = unsafe extern "C" fn() -> *mut TclInterp;
pub type InterpFn = unsafe extern "C" fn(*mut TclInterp) -> c_int;
pub type DeleteInterpFn = unsafe extern "C" fn(*mut TclInterp);
pub type GetVar2Fn =
    unsafe extern "C" fn(*mut TclInterp, *const c_char, *const c_char, c_int) -> *const c_char;
pub type GetStringResultFn = unsafe extern "C" fn(*mut TclInterp) -> *const c_char;
pub type DoOneEventFn = unsafe extern "C" fn(c_int) -> c_int;
pub type FinalizeFn = unsafe extern "C" fn();
pub type CancelEvalFn =
    unsafe extern "C" fn(*mut TclInterp, *mut c_void, *mut c_void, c_int) -> c_int;
pub type InterpFlagsFn = unsafe extern "C" fn(*mut TclInterp, c_int) -> c_int;
pub type SetKitPathFn = unsafe extern "C" fn(*const c_char) -> *const c_char;
pub type InitMemoryFn = unsafe extern "C" fn(*mut TclInterp);

/// Entry points resolved from one loaded module.
#[derive(Clone)]
pub struct TclApi {
    path: PathBuf,
    handle: usize,

    get_version: GetVersionFn,
    find_executable: FindExecutableFn,
    create_interp: CreateInterpFn,
    init: InterpFn,
    delete_interp: DeleteInterpFn,
    interp_deleted: InterpFn,
    get_var2: GetVar2Fn,
    get_string_result: GetStringResultFn,
    do_one_event: DoOneEventFn,
    finalize: FinalizeFn,

    interp_active: Option<InterpFn>,
    cancel_eval: Option<CancelEvalFn>,
    canceled: Option<InterpFlagsFn>,
    reset_cancellation: Option<InterpFlagsFn>,
    kit_app_init: Option<InterpFn>,
    kit_set_path: Option<SetKitPathFn>,
    init_memory: Option<InitMemoryFn>,
    make_safe: Option<InterpFn>,
}

impl std::fmt::Debug for TclApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TclApi")
            .field("path", &self.path)
            .field("handle", &format_args!("{:#x}", self.handle))
            .field("interp_active", &self.interp_active.is_some())
            .field("cancel_eval", &self.cancel_eval.is_some())
            .field("kit_app_init", &self.kit_app_init.is_some())
            .finish()
    }
}

macro_rules! resolve {
    ($module:expr, $name:literal, $ty:ty) => {
        match $module.symbol($name) {
            // Safety: the address was exported under the documented name and
            // the alias type mirrors its C prototype.
            Some(addr) => Some(unsafe { std::mem::transmute::<usize, $ty>(addr) }),
            None => None,
        }
    };
}

macro_rules! require {
    ($module:expr, $name:literal, $ty:ty) => {
        resolve!($module, $name, $ty).ok_or_else(|| {
            TclError::AbiUnavailable(format!("{} in \"{}\"", $name, $module.path().display()))
        })?
    };
}

fn c_string(text: &str) -> TclResult<CString> {
    CString::new(text).map_err(|_| TclError::InvalidPath {
        path: PathBuf::from(text),
        reason: "contains an interior NUL".to_string(),
    })
}

/// Copy a native string; null reads as `None`.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn owned(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

impl TclApi {
    /// Resolve every entry point from `module`.
    pub fn bootstrap(module: &dyn NativeModule) -> TclResult<Self> {
        let api = Self {
            path: module.path().to_path_buf(),
            handle: module.handle(),
            get_version: require!(module, "Tcl_GetVersion", GetVersionFn),
            find_executable: require!(module, "Tcl_FindExecutable", FindExecutableFn),
            create_interp: require!(module, "Tcl_CreateInterp", CreateInterpFn),
            init: require!(module, "Tcl_Init", InterpFn),
            delete_interp: require!(module, "Tcl_DeleteInterp", DeleteInterpFn),
            interp_deleted: require!(module, "Tcl_InterpDeleted", InterpFn),
            get_var2: require!(module, "Tcl_GetVar2", GetVar2Fn),
            get_string_result: require!(module, "Tcl_GetStringResult", GetStringResultFn),
            do_one_event: require!(module, "Tcl_DoOneEvent", DoOneEventFn),
            finalize: require!(module, "Tcl_Finalize", FinalizeFn),
            interp_active: resolve!(module, "Tcl_InterpActive", InterpFn),
            cancel_eval: resolve!(module, "Tcl_CancelEval", CancelEvalFn),
            canceled: resolve!(module, "Tcl_Canceled", InterpFlagsFn),
            reset_cancellation: resolve!(module, "TclResetCancellation", InterpFlagsFn),
            kit_app_init: resolve!(module, "TclKit_AppInit", InterpFn),
            kit_set_path: resolve!(module, "TclKit_SetKitPath", SetKitPathFn),
            init_memory: resolve!(module, "Tcl_InitMemory", InitMemoryFn),
            make_safe: resolve!(module, "Tcl_MakeSafe", InterpFn),
        };
        tracing::debug!(path = %api.path.display(), "native entry points resolved");
        Ok(api)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Handle of the module the table was resolved from
    pub fn handle(&self) -> usize {
        self.handle
    }

    fn unavailable(&self, name: &str) -> TclError {
        TclError::AbiUnavailable(format!("{} in \"{}\"", name, self.path.display()))
    }

    /// Version compiled into the loaded module
    pub fn get_version(&self) -> (PatchLevel, ReleaseLevel) {
        let (mut major, mut minor, mut patch, mut level) = (0, 0, 0, 0);
        // Safety: all four out-pointers are valid for writes.
        unsafe { (self.get_version)(&mut major, &mut minor, &mut patch, &mut level) };
        let parts = [major, minor, patch].map(|p| u32::try_from(p).unwrap_or(0));
        (PatchLevel::new(&parts), ReleaseLevel::from_native(level))
    }

    pub fn find_executable(&self, argv0: Option<&str>) -> TclResult<()> {
        let arg = argv0.map(c_string).transpose()?;
        let ptr = arg.as_ref().map(|a| a.as_ptr()).unwrap_or(std::ptr::null());
        // Safety: `ptr` is null or a live NUL-terminated string.
        unsafe { (self.find_executable)(ptr) };
        Ok(())
    }

    /// Create an interpreter; null means the runtime could not allocate one.
    pub fn create_interp(&self) -> *mut TclInterp {
        // Safety: takes no arguments.
        unsafe { (self.create_interp)() }
    }

    /// # Safety
    ///
    /// `interp` must be a live interpreter created by this module.
    pub unsafe fn init(&self, interp: *mut TclInterp) -> Result<(), String> {
        match (self.init)(interp) {
            TCL_OK => Ok(()),
            _ => Err(self.string_result(interp)),
        }
    }

    /// # Safety
    ///
    /// `interp` must be a live interpreter created by this module.
    pub unsafe fn kit_app_init(&self, interp: *mut TclInterp) -> TclResult<Result<(), String>> {
        let app_init = self.kit_app_init.ok_or_else(|| self.unavailable("TclKit_AppInit"))?;
        Ok(match app_init(interp) {
            TCL_OK => Ok(()),
            _ => Err(self.string_result(interp)),
        })
    }

    pub fn kit_set_path(&self, path: &Path) -> TclResult<()> {
        let set_path = self.kit_set_path.ok_or_else(|| self.unavailable("TclKit_SetKitPath"))?;
        let text = c_string(&path.to_string_lossy())?;
        // Safety: the runtime copies the string before returning.
        unsafe { set_path(text.as_ptr()) };
        Ok(())
    }

    /// # Safety
    ///
    /// `interp` must be a live interpreter created by this module.
    pub unsafe fn init_memory(&self, interp: *mut TclInterp) -> TclResult<()> {
        let init_memory = self.init_memory.ok_or_else(|| self.unavailable("Tcl_InitMemory"))?;
        init_memory(interp);
        Ok(())
    }

    /// # Safety
    ///
    /// `interp` must be a live interpreter created by this module.
    pub unsafe fn make_safe(&self, interp: *mut TclInterp) -> TclResult<Result<(), String>> {
        let make_safe = self.make_safe.ok_or_else(|| self.unavailable("Tcl_MakeSafe"))?;
        Ok(match make_safe(interp) {
            TCL_OK => Ok(()),
            _ => Err(self.string_result(interp)),
        })
    }

    /// # Safety
    ///
    /// `interp` must be an interpreter created by this module and not yet
    /// deleted.
    pub unsafe fn delete_interp(&self, interp: *mut TclInterp) {
        (self.delete_interp)(interp)
    }

    /// # Safety
    ///
    /// `interp` must be an interpreter created by this module.
    pub unsafe fn interp_deleted(&self, interp: *mut TclInterp) -> bool {
        (self.interp_deleted)(interp) != 0
    }

    /// Evaluation nesting level of `interp`.
    ///
    /// # Safety
    ///
    /// `interp` must be a live interpreter created by this module.
    pub unsafe fn interp_active(&self, interp: *mut TclInterp) -> TclResult<i32> {
        let active = self.interp_active.ok_or_else(|| self.unavailable("Tcl_InterpActive"))?;
        Ok(active(interp))
    }

    pub fn has_interp_active(&self) -> bool {
        self.interp_active.is_some()
    }

    /// # Safety
    ///
    /// `interp` must be a live interpreter created by this module.
    pub unsafe fn get_var(
        &self,
        interp: *mut TclInterp,
        name1: &str,
        name2: Option<&str>,
    ) -> TclResult<Option<String>> {
        let name1 = c_string(name1)?;
        let name2 = name2.map(c_string).transpose()?;
        let ptr2 = name2.as_ref().map(|n| n.as_ptr()).unwrap_or(std::ptr::null());
        Ok(owned((self.get_var2)(interp, name1.as_ptr(), ptr2, TCL_GLOBAL_ONLY)))
    }

    /// # Safety
    ///
    /// `interp` must be a live interpreter created by this module.
    pub unsafe fn string_result(&self, interp: *mut TclInterp) -> String {
        owned((self.get_string_result)(interp)).unwrap_or_default()
    }

    /// Process at most one event; returns whether one was processed.
    pub fn do_one_event(&self, flags: c_int) -> bool {
        // Safety: the event loop is reentrant for any thread that loaded the
        // module.
        unsafe { (self.do_one_event)(flags) != 0 }
    }

    pub fn finalize(&self) {
        // Safety: takes no arguments; callers ensure no interpreter is in use.
        unsafe { (self.finalize)() }
    }

    /// Ask the runtime to unwind any evaluation in `interp`; returns whether
    /// the request was accepted.
    ///
    /// Callable from any thread.
    ///
    /// # Safety
    ///
    /// `interp` must be an interpreter created by this module.
    pub unsafe fn cancel_eval(&self, interp: *mut TclInterp) -> TclResult<bool> {
        let cancel = self.cancel_eval.ok_or_else(|| self.unavailable("Tcl_CancelEval"))?;
        Ok(cancel(interp, std::ptr::null_mut(), std::ptr::null_mut(), TCL_CANCEL_UNWIND) == TCL_OK)
    }

    pub fn has_cancellation(&self) -> bool {
        self.cancel_eval.is_some()
    }

    /// # Safety
    ///
    /// `interp` must be an interpreter created by this module.
    pub unsafe fn canceled(&self, interp: *mut TclInterp) -> TclResult<bool> {
        let canceled = self.canceled.ok_or_else(|| self.unavailable("Tcl_Canceled"))?;
        Ok(canceled(interp, 0) == TCL_ERROR)
    }

    /// # Safety
    ///
    /// `interp` must be an interpreter created by this module.
    pub unsafe fn reset_cancellation(&self, interp: *mut TclInterp, force: bool) -> TclResult<()> {
        let reset = self
            .reset_cancellation
            .ok_or_else(|| self.unavailable("TclResetCancellation"))?;
        reset(interp, c_int::from(force));
        Ok(())
    }
}
