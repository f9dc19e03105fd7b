//! # Mock Platform
//!
//! In-memory implementation of [`Firmware`], [`Network`] and [`Console`]
//! for host-side tests. Every call is recorded in [`MockState`]; tests
//! script TFTP files, key presses and firmware results up front and inspect
//! the recorded calls afterwards.
//!
//! Page allocations are real heap allocations, so loaded images can be
//! mapped and relocated in place on the host.

use crate::{
    Console, DevicePath, Firmware, Guid, HalError, HalResult, Handle,
    ImageVerifier, Ipv4Addr, Key, LoadedImageRecord, MacAddr, Network, PhysAddr,
    PxeModeFlags, StartOutcome, Status, PAGE_SIZE,
};
use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

/// Handle of the chainloader itself
pub const LOADER_HANDLE: Handle = Handle(0x100);

/// Handle of the network boot device
pub const BOOT_DEVICE_HANDLE: Handle = Handle(0x200);

/// Callback run in place of the image entry point
pub type EntryHook = Box<dyn FnMut(PhysAddr, Handle) -> Status + Send>;

/// Scripted verifier
#[derive(Debug)]
pub struct MockVerifier {
    accept: bool,
    verified: Mutex<Vec<Vec<u8>>>,
}

impl MockVerifier {
    /// Verifier that accepts (`true`) or rejects every image
    pub fn new(accept: bool) -> Self {
        Self { accept, verified: Mutex::new(Vec::new()) }
    }

    /// Images passed to [`ImageVerifier::verify`]
    pub fn verified(&self) -> Vec<Vec<u8>> {
        self.verified.lock().clone()
    }
}

impl ImageVerifier for MockVerifier {
    fn verify(&self, image: &[u8]) -> Status {
        self.verified.lock().push(image.to_vec());
        if self.accept {
            Status::SUCCESS
        } else {
            Status::SECURITY_VIOLATION
        }
    }
}

/// Recorded and scripted platform state
#[derive(Default)]
pub struct MockState {
    // --- firmware ---
    /// Live allocations: base address to page count
    pub allocations: BTreeMap<u64, usize>,
    /// Number of successful page allocations over the lifetime
    pub allocation_count: usize,
    /// Make the next allocations fail
    pub fail_allocations: bool,
    /// Loaded-image records by handle
    pub loaded_images: BTreeMap<Handle, LoadedImageRecord>,
    /// Firmware variables by name
    pub variables: BTreeMap<String, Vec<u8>>,
    /// Device paths by handle
    pub device_paths: BTreeMap<Handle, DevicePath>,
    /// Error returned by `load_image`, if set
    pub load_image_error: Option<Status>,
    /// Buffers passed to `load_image`
    pub loaded_sources: Vec<Vec<u8>>,
    /// Device paths passed to `load_image`
    pub load_paths: Vec<Option<DevicePath>>,
    /// Outcome returned by `start_image`
    pub start_outcome: Option<StartOutcome>,
    /// Handles passed to `start_image`
    pub started: Vec<Handle>,
    /// Handles passed to `unload_image`
    pub unloaded: Vec<Handle>,
    /// Status returned from entry-point calls without a hook
    pub entry_status: Status,
    /// Entry-point calls (entry, handle)
    pub entry_calls: Vec<(PhysAddr, Handle)>,
    /// Loader's loaded-image record as seen at each entry-point call
    pub records_at_entry: Vec<LoadedImageRecord>,
    /// Hook run in place of the entry point
    pub entry_hook: Option<EntryHook>,
    /// Cache sync requests
    pub synced: Vec<(PhysAddr, usize)>,
    next_handle: usize,

    // --- network ---
    /// PXE base code state
    pub pxe_mode: PxeModeFlags,
    /// DHCP server address
    pub dhcp_server: Option<Ipv4Addr>,
    /// Client MAC address
    pub mac: MacAddr,
    /// Raw DHCP discover packet
    pub discover_packet: Vec<u8>,
    /// SMBIOS UUID
    pub uuid: Option<String>,
    /// TFTP files by (server, name)
    pub files: BTreeMap<(Ipv4Addr, String), Vec<u8>>,
    /// Remaining scripted failures per file name
    pub file_failures: BTreeMap<String, usize>,
    /// TFTP reads issued (server, name)
    pub tftp_reads: Vec<(Ipv4Addr, String)>,
    /// DNS table
    pub hosts: BTreeMap<String, Ipv4Addr>,
    /// Number of DNS lookups answered with `NotReady` before resolving
    pub dns_not_ready: usize,
    /// DNS lookups issued
    pub dns_queries: Vec<String>,
    /// DHCP ACK rewrites (boot file, server)
    pub rewrites: Vec<(String, Ipv4Addr)>,

    // --- console ---
    /// Everything printed
    pub output: String,
    /// Scripted key reads; `None` simulates a timeout
    pub keys: VecDeque<Option<Key>>,
    /// Simulated clock
    pub clock_ms: u64,
    /// Sleep requests in milliseconds
    pub sleeps: Vec<u32>,
    /// Timeouts passed to `read_key`
    pub key_timeouts: Vec<u32>,
    /// Cursor position
    pub cursor: (usize, usize),
    /// Highlight attribute
    pub highlight: bool,
    /// Number of screen clears
    pub clears: usize,
}

impl core::fmt::Debug for MockState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MockState")
            .field("allocations", &self.allocations)
            .field("entry_calls", &self.entry_calls)
            .field("tftp_reads", &self.tftp_reads)
            .finish_non_exhaustive()
    }
}

/// Recording platform for tests
#[derive(Debug)]
pub struct MockPlatform {
    state: Mutex<MockState>,
    verifier: Option<MockVerifier>,
}

impl MockPlatform {
    /// Network-booted platform with a DHCP server at 10.0.0.1
    pub fn new() -> Self {
        let mut state = MockState {
            pxe_mode: PxeModeFlags::all(),
            dhcp_server: Some(Ipv4Addr::new(10, 0, 0, 1)),
            mac: MacAddr::new(0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e),
            next_handle: 0x1000,
            ..MockState::default()
        };

        let device = DevicePath::from_bytes(alloc::vec![0x03, 0x0b, 8, 0, 0, 0, 0, 0, 0x7f, 0xff, 4, 0]);
        state.device_paths.insert(BOOT_DEVICE_HANDLE, device.clone());
        state.loaded_images.insert(LOADER_HANDLE, LoadedImageRecord {
            parent_handle: Handle::NULL,
            device_handle: BOOT_DEVICE_HANDLE,
            file_path: device.with_file("/netchain.efi"),
            load_options: Vec::new(),
            image_base: PhysAddr::new(0x10_0000),
            image_size: 0x4000,
        });

        Self { state: Mutex::new(state), verifier: None }
    }

    /// Install a verifier
    pub fn with_verifier(mut self, verifier: MockVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Installed verifier
    pub fn verifier(&self) -> Option<&MockVerifier> {
        self.verifier.as_ref()
    }

    /// Serve `contents` as `name` from `server`
    pub fn add_file(&self, server: Ipv4Addr, name: &str, contents: &[u8]) {
        self.state.lock().files.insert((server, name.to_string()), contents.to_vec());
    }

    /// Queue key reads; `None` is a read that times out
    pub fn push_keys(&self, keys: &[Option<Key>]) {
        self.state.lock().keys.extend(keys.iter().copied());
    }

    /// Access the recorded state
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock()
    }

    /// Number of live page allocations
    pub fn live_allocations(&self) -> usize {
        self.state.lock().allocations.len()
    }

    fn take_failure(state: &mut MockState, filename: &str) -> bool {
        match state.file_failures.get_mut(filename) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockPlatform {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (&base, &pages) in state.allocations.iter() {
            if let Ok(layout) = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE) {
                // SAFETY: allocated in `allocate_pages` with this layout
                unsafe { dealloc(base as usize as *mut u8, layout) };
            }
        }
        state.allocations.clear();
    }
}

// =============================================================================
// FIRMWARE
// =============================================================================

impl Firmware for MockPlatform {
    fn allocate_pages(&self, pages: usize) -> HalResult<PhysAddr> {
        let mut state = self.state.lock();
        if state.fail_allocations || pages == 0 {
            return Err(HalError::OutOfMemory);
        }
        let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE)
            .map_err(|_| HalError::InvalidParameter)?;
        // SAFETY: layout has a non-zero size
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(HalError::OutOfMemory);
        }
        let base = ptr as usize as u64;
        state.allocations.insert(base, pages);
        state.allocation_count += 1;
        log::trace!("mock: allocated {} pages at {:#x}", pages, base);
        Ok(PhysAddr::new(base))
    }

    fn free_pages(&self, base: PhysAddr, pages: usize) {
        let mut state = self.state.lock();
        match state.allocations.remove(&base.as_u64()) {
            Some(allocated) => {
                assert_eq!(allocated, pages, "free_pages with wrong page count");
                if let Ok(layout) = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE) {
                    // SAFETY: allocated in `allocate_pages` with this layout
                    unsafe { dealloc(base.as_u64() as usize as *mut u8, layout) };
                }
            }
            None => panic!("free_pages on unknown allocation {:#x}", base),
        }
    }

    fn image_handle(&self) -> Handle {
        LOADER_HANDLE
    }

    fn loaded_image(&self, handle: Handle) -> HalResult<LoadedImageRecord> {
        self.state.lock().loaded_images.get(&handle).cloned().ok_or(HalError::NotFound)
    }

    fn set_loaded_image(&self, handle: Handle, record: LoadedImageRecord) -> HalResult<()> {
        let mut state = self.state.lock();
        match state.loaded_images.get_mut(&handle) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(HalError::NotFound),
        }
    }

    fn get_variable(&self, name: &str, _vendor: &Guid) -> Option<Vec<u8>> {
        self.state.lock().variables.get(name).cloned()
    }

    fn image_verifier(&self) -> Option<&dyn ImageVerifier> {
        self.verifier.as_ref().map(|v| v as &dyn ImageVerifier)
    }

    fn device_path(&self, handle: Handle) -> Option<DevicePath> {
        self.state.lock().device_paths.get(&handle).cloned()
    }

    fn load_image(
        &self,
        parent: Handle,
        path: Option<&DevicePath>,
        source: &[u8],
    ) -> Result<Handle, Status> {
        let mut state = self.state.lock();
        state.loaded_sources.push(source.to_vec());
        state.load_paths.push(path.cloned());
        if let Some(status) = state.load_image_error {
            return Err(status);
        }
        state.next_handle += 1;
        let handle = Handle(state.next_handle);
        state.loaded_images.insert(handle, LoadedImageRecord {
            parent_handle: parent,
            image_size: source.len() as u64,
            ..LoadedImageRecord::default()
        });
        Ok(handle)
    }

    fn start_image(&self, handle: Handle) -> StartOutcome {
        let mut state = self.state.lock();
        state.started.push(handle);
        state.start_outcome.clone().unwrap_or_else(StartOutcome::success)
    }

    fn unload_image(&self, handle: Handle) -> Status {
        let mut state = self.state.lock();
        state.unloaded.push(handle);
        match state.loaded_images.remove(&handle) {
            Some(_) => Status::SUCCESS,
            None => Status::INVALID_PARAMETER,
        }
    }

    fn sync_caches(&self, base: PhysAddr, len: usize) {
        self.state.lock().synced.push((base, len));
    }

    unsafe fn call_entry(&self, entry: PhysAddr, handle: Handle) -> Status {
        let hook = {
            let mut state = self.state.lock();
            state.entry_calls.push((entry, handle));
            let record = state.loaded_images.get(&LOADER_HANDLE).cloned().unwrap_or_default();
            state.records_at_entry.push(record);
            state.entry_hook.take()
        };

        match hook {
            Some(mut hook) => {
                let status = hook(entry, handle);
                self.state.lock().entry_hook = Some(hook);
                status
            }
            None => self.state.lock().entry_status,
        }
    }
}

// =============================================================================
// NETWORK
// =============================================================================

impl Network for MockPlatform {
    fn pxe_mode(&self) -> PxeModeFlags {
        self.state.lock().pxe_mode
    }

    fn dhcp_server(&self) -> HalResult<Ipv4Addr> {
        self.state.lock().dhcp_server.ok_or(HalError::NotFound)
    }

    fn client_mac(&self) -> HalResult<MacAddr> {
        Ok(self.state.lock().mac)
    }

    fn dhcp_discover_packet(&self) -> HalResult<Vec<u8>> {
        let state = self.state.lock();
        if state.discover_packet.is_empty() {
            Err(HalError::NotFound)
        } else {
            Ok(state.discover_packet.clone())
        }
    }

    fn system_uuid(&self) -> Option<String> {
        self.state.lock().uuid.clone()
    }

    fn tftp_file_size(&self, server: Ipv4Addr, filename: &str) -> HalResult<u64> {
        let mut state = self.state.lock();
        if Self::take_failure(&mut state, filename) {
            return Err(HalError::Firmware(Status::TFTP_ERROR));
        }
        state
            .files
            .get(&(server, filename.to_string()))
            .map(|data| data.len() as u64)
            .ok_or(HalError::Firmware(Status::TFTP_ERROR))
    }

    fn tftp_read_file(&self, server: Ipv4Addr, filename: &str, buffer: &mut [u8]) -> HalResult<usize> {
        let mut state = self.state.lock();
        state.tftp_reads.push((server, filename.to_string()));
        let data = state
            .files
            .get(&(server, filename.to_string()))
            .ok_or(HalError::Firmware(Status::TFTP_ERROR))?;
        if buffer.len() < data.len() {
            return Err(HalError::Firmware(Status::BUFFER_TOO_SMALL));
        }
        buffer[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn resolve_host(&self, name: &str) -> HalResult<Ipv4Addr> {
        let mut state = self.state.lock();
        state.dns_queries.push(name.to_string());
        if state.dns_not_ready > 0 {
            state.dns_not_ready -= 1;
            return Err(HalError::NotReady);
        }
        state.hosts.get(name).copied().ok_or(HalError::NotFound)
    }

    fn rewrite_boot_parameters(&self, boot_file: &str, server: Ipv4Addr) -> HalResult<()> {
        let mut state = self.state.lock();
        if !state.pxe_mode.contains(PxeModeFlags::DHCP_ACK_RECEIVED) {
            return Err(HalError::NotFound);
        }
        state.rewrites.push((boot_file.to_string(), server));
        state.pxe_mode.remove(PxeModeFlags::PROXY_OFFER_RECEIVED | PxeModeFlags::PXE_REPLY_RECEIVED);
        Ok(())
    }
}

// =============================================================================
// CONSOLE
// =============================================================================

impl Console for MockPlatform {
    fn print(&self, text: &str) {
        self.state.lock().output.push_str(text);
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.clears += 1;
        state.cursor = (0, 0);
    }

    fn cursor(&self) -> (usize, usize) {
        self.state.lock().cursor
    }

    fn set_cursor(&self, column: usize, row: usize) {
        self.state.lock().cursor = (column, row);
    }

    fn set_highlight(&self, highlight: bool) {
        self.state.lock().highlight = highlight;
    }

    fn read_key(&self, timeout_ms: u32) -> Option<Key> {
        let mut state = self.state.lock();
        state.key_timeouts.push(timeout_ms);
        match state.keys.pop_front() {
            Some(Some(key)) => Some(key),
            Some(None) => {
                state.clock_ms += u64::from(timeout_ms);
                None
            }
            None if timeout_ms == 0 => panic!("blocking key read with an empty key script"),
            None => {
                state.clock_ms += u64::from(timeout_ms);
                None
            }
        }
    }

    fn sleep_ms(&self, ms: u32) {
        let mut state = self.state.lock();
        state.sleeps.push(ms);
        state.clock_ms += u64::from(ms);
    }

    fn ticks_ms(&self) -> u64 {
        self.state.lock().clock_ms
    }
}
