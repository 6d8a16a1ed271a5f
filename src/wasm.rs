//! Browser bindings via wasm-bindgen.
//!
//! This module is only compiled when the `web` feature is enabled.
//!
//! # Usage
//!
//! Build with wasm-pack:
//! ```bash
//! wasm-pack build --target web --features web
//! ```
//!
//! # JavaScript Example
//!
//! ```javascript
//! import init, { deck_init, deck_start, deck_stop } from './stepdeck.js';
//!
//! await init();
//! deck_init();
//!
//! // Optional partial override of the defaults
//! await deck_start(JSON.stringify({ patch_url: "export/patch.export.json" }));
//!
//! // The first click anywhere on the page creates the device.
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use js_sys::{Array, Float32Array, Function, Map, Object, Promise, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{JsFuture, spawn_local};
use web_sys::{
    AudioContext, AudioNode, CanvasRenderingContext2d, Document, Element, Event, EventTarget,
    GainNode, HtmlCanvasElement, HtmlElement, HtmlInputElement, HtmlScriptElement, MouseEvent,
    Response, Window,
};

use crate::config::DeckConfig;
use crate::controls::Layout;
use crate::deck::{Deck, UiEvent};
use crate::device::{Device, DeviceEvent, EventSink};
use crate::error::{DeckError, DeckResult, LogFailure};
use crate::loader::{GraphDescription, RuntimeLoad, RuntimeRegistry};
use crate::state::SessionState;
use crate::surface::{Canvas, Surface};

const RUNTIME_GLOBAL: &str = "RNBO";

// ═══════════════════════════════════════════════════════════════════════════
// Initialization
// ═══════════════════════════════════════════════════════════════════════════

/// Initialize the wasm module. Call this once before using any other functions.
/// Sets up panic hooks and console logging.
#[wasm_bindgen]
pub fn deck_init() {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Debug).ok();
}

/// Load the graph description and runtime, then wire the page.
///
/// `config_json` is an optional partial `DeckConfig` override.
#[wasm_bindgen]
pub async fn deck_start(config_json: Option<String>) -> Result<(), JsValue> {
    start(config_json).await.map_err(|e| {
        log::error!("deck start failed: {e}");
        JsValue::from_str(&e.to_string())
    })
}

/// Stop all timers, listeners and deferred work, and close the audio context.
#[wasm_bindgen]
pub fn deck_stop() {
    match RUNTIME.with(|r| r.borrow_mut().take()) {
        Some(runtime) => {
            drop(runtime);
            log::info!("deck stopped");
        }
        None => log::debug!("deck_stop called without a running deck"),
    }
}

/// Set a device parameter from script (deferred until the device exists).
#[wasm_bindgen]
pub fn deck_set_parameter(name: &str, value: f64) {
    with_shared(|shared| {
        if let Ok(mut deck) = shared.deck.try_borrow_mut() {
            deck.set_parameter(name, value).log_failure("deck_set_parameter");
        }
    });
}

thread_local! {
    static RUNTIME: RefCell<Option<WebRuntime>> = const { RefCell::new(None) };
}

fn with_shared(f: impl FnOnce(&Rc<Shared>)) {
    RUNTIME.with(|r| {
        if let Some(runtime) = r.borrow().as_ref() {
            f(&runtime.shared);
        }
    });
}

fn browser_error(operation: &str, err: JsValue) -> DeckError {
    let reason = err
        .as_string()
        .or_else(|| {
            Reflect::get(&err, &JsValue::from_str("message"))
                .ok()
                .and_then(|m| m.as_string())
        })
        .unwrap_or_else(|| format!("{err:?}"));
    DeckError::Browser {
        operation: operation.to_string(),
        reason,
    }
}

/// `target[key]`, failing on exceptions and `undefined`.
fn get(target: &JsValue, key: &str) -> DeckResult<JsValue> {
    let value = Reflect::get(target, &JsValue::from_str(key))
        .map_err(|e| browser_error(&format!("reading '{key}'"), e))?;
    if value.is_undefined() {
        return Err(DeckError::Browser {
            operation: format!("reading '{key}'"),
            reason: "undefined".to_string(),
        });
    }
    Ok(value)
}

fn get_function(target: &JsValue, key: &str) -> DeckResult<Function> {
    get(target, key)?.dyn_into::<Function>().map_err(|_| DeckError::Browser {
        operation: format!("calling '{key}'"),
        reason: "not a function".to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Resource loading
// ═══════════════════════════════════════════════════════════════════════════

/// Fetch and parse the graph description document.
pub async fn load_graph(window: &Window, url: &str) -> DeckResult<GraphDescription> {
    let fetch_error = |reason: String| DeckError::Fetch {
        url: url.to_string(),
        reason,
    };

    let response = JsFuture::from(window.fetch_with_str(url))
        .await
        .map_err(|e| fetch_error(browser_error("fetch", e).to_string()))?;
    let response: Response = response
        .dyn_into()
        .map_err(|_| fetch_error("fetch did not return a Response".to_string()))?;
    if !response.ok() {
        return Err(fetch_error(format!("HTTP {}", response.status())));
    }

    let text = response
        .text()
        .map_err(|e| fetch_error(browser_error("reading body", e).to_string()))?;
    let text = JsFuture::from(text)
        .await
        .map_err(|e| fetch_error(browser_error("reading body", e).to_string()))?
        .as_string()
        .ok_or_else(|| fetch_error("body is not text".to_string()))?;

    log::info!("graph description fetched from {url}");
    GraphDescription::from_json(url, &text)
}

fn runtime_present() -> bool {
    Reflect::has(&js_sys::global(), &JsValue::from_str(RUNTIME_GLOBAL)).unwrap_or(false)
}

/// Make the runtime for `version` available, injecting its script once.
pub async fn ensure_runtime(
    document: &Document,
    registry: &mut RuntimeRegistry,
    version: &str,
) -> DeckResult<()> {
    let url = match registry.plan(version, runtime_present()) {
        RuntimeLoad::AlreadyPresent => return Ok(()),
        RuntimeLoad::Inject { url } => url,
    };

    match inject_script(document, &url).await {
        Ok(()) => {
            log::info!("runtime {version} loaded");
            Ok(())
        }
        Err(reason) => {
            registry.mark_failed(version);
            Err(DeckError::RuntimeLoad {
                version: version.to_string(),
                url,
                reason,
            })
        }
    }
}

async fn inject_script(document: &Document, url: &str) -> Result<(), String> {
    let script: HtmlScriptElement = document
        .create_element("script")
        .map_err(|e| browser_error("creating script", e).to_string())?
        .unchecked_into();
    script.set_src(url);

    let loaded = Promise::new(&mut |resolve, reject| {
        script.set_onload(Some(&resolve));
        script.set_onerror(Some(&reject));
    });

    let body = document
        .body()
        .ok_or_else(|| "document has no body".to_string())?;
    body.append_child(&script)
        .map_err(|e| browser_error("appending script", e).to_string())?;

    JsFuture::from(loaded)
        .await
        .map(|_| ())
        .map_err(|_| "script failed to load".to_string())
}

// ═══════════════════════════════════════════════════════════════════════════
// Device
// ═══════════════════════════════════════════════════════════════════════════

/// A runtime event subscription, unsubscribed on drop.
struct Subscription {
    handle: JsValue,
    _callback: Closure<dyn FnMut(JsValue)>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(unsubscribe) = get_function(&self.handle, "unsubscribe") {
            let _ = unsubscribe.call0(&self.handle);
        }
    }
}

fn subscribe(
    device: &JsValue,
    emitter: &str,
    callback: Closure<dyn FnMut(JsValue)>,
) -> DeckResult<Subscription> {
    let emitter = get(device, emitter)?;
    let handle = get_function(&emitter, "subscribe")?
        .call1(&emitter, callback.as_ref())
        .map_err(|e| browser_error("subscribe", e))?;
    Ok(Subscription {
        handle,
        _callback: callback,
    })
}

fn payload_values(payload: &JsValue) -> Vec<f64> {
    if Array::is_array(payload) {
        Array::from(payload)
            .iter()
            .filter_map(|v| v.as_f64())
            .collect()
    } else {
        payload.as_f64().into_iter().collect()
    }
}

type BufferCache = Rc<RefCell<HashMap<String, Vec<f32>>>>;

/// A device created by the runtime library.
///
/// The runtime only hands out data buffers asynchronously. `request_buffer`
/// fetches one in the background and `data_buffer` serves the last copy
/// received. Until a fetch succeeds, the last payload of the outport message
/// with the same name stands in.
pub struct WebDevice {
    runtime: JsValue,
    device: JsValue,
    context: AudioContext,
    parameters: Map,
    buffers: BufferCache,
    messages: BufferCache,
    in_flight: Rc<RefCell<HashSet<String>>>,
    _subscriptions: Vec<Subscription>,
}

impl WebDevice {
    /// Create the device, connect it to `output` and forward its events.
    pub async fn create(
        context: &AudioContext,
        output: &GainNode,
        patcher: &JsValue,
        sink: EventSink,
    ) -> DeckResult<Self> {
        let runtime = get(&js_sys::global(), RUNTIME_GLOBAL)?;

        let options = Object::new();
        Reflect::set(&options, &JsValue::from_str("context"), context)
            .map_err(|e| browser_error("device options", e))?;
        Reflect::set(&options, &JsValue::from_str("patcher"), patcher)
            .map_err(|e| browser_error("device options", e))?;

        let pending: Promise = get_function(&runtime, "createDevice")?
            .call1(&runtime, &options)
            .map_err(|e| browser_error("createDevice", e))?
            .dyn_into()
            .map_err(|_| DeckError::Browser {
                operation: "createDevice".to_string(),
                reason: "did not return a promise".to_string(),
            })?;
        let device = JsFuture::from(pending)
            .await
            .map_err(|e| browser_error("createDevice", e))?;

        let node: AudioNode = get(&device, "node")?
            .dyn_into()
            .map_err(|_| DeckError::Browser {
                operation: "device.node".to_string(),
                reason: "not an AudioNode".to_string(),
            })?;
        node.connect_with_audio_node(output)
            .map_err(|e| browser_error("connecting device output", e))?;

        let parameters: Map = get(&device, "parametersById")?
            .dyn_into()
            .map_err(|_| DeckError::Browser {
                operation: "device.parametersById".to_string(),
                reason: "not a Map".to_string(),
            })?;

        let messages = Rc::new(RefCell::new(HashMap::new()));
        let subscriptions = vec![
            subscribe(&device, "parameterChangeEvent", parameter_callback(sink.clone()))?,
            subscribe(
                &device,
                "messageEvent",
                message_callback(sink, Rc::clone(&messages)),
            )?,
        ];

        log::info!("device created with {} parameters", parameters.size());
        Ok(Self {
            runtime,
            device,
            context: context.clone(),
            parameters,
            buffers: Rc::new(RefCell::new(HashMap::new())),
            messages,
            in_flight: Rc::new(RefCell::new(HashSet::new())),
            _subscriptions: subscriptions,
        })
    }

    /// Fetch the named data buffer in the background.
    ///
    /// At most one fetch per buffer is outstanding. The buffer is handed
    /// back to the device as soon as its first channel has been copied.
    pub fn request_buffer(&self, name: &str) {
        if !self.in_flight.borrow_mut().insert(name.to_string()) {
            return;
        }

        let device = self.device.clone();
        let context = self.context.clone();
        let buffers = Rc::clone(&self.buffers);
        let in_flight = Rc::clone(&self.in_flight);
        let name = name.to_string();
        spawn_local(async move {
            match read_buffer(&device, &context, &name).await {
                Ok(samples) => {
                    if let Ok(mut buffers) = buffers.try_borrow_mut() {
                        buffers.insert(name.clone(), samples);
                    }
                }
                Err(e) => log::debug!("data buffer '{name}' unavailable: {e}"),
            }
            in_flight.borrow_mut().remove(&name);
        });
    }

    fn parameter_object(&self, name: &str) -> Option<JsValue> {
        let param = self.parameters.get(&JsValue::from_str(name));
        (!param.is_undefined()).then_some(param)
    }
}

async fn read_buffer(device: &JsValue, context: &AudioContext, name: &str) -> DeckResult<Vec<f32>> {
    let released: Promise = get_function(device, "releaseDataBuffer")?
        .call1(device, &JsValue::from_str(name))
        .map_err(|e| browser_error("releaseDataBuffer", e))?
        .dyn_into()
        .map_err(|_| DeckError::Browser {
            operation: "releaseDataBuffer".to_string(),
            reason: "did not return a promise".to_string(),
        })?;
    let buffer = JsFuture::from(released)
        .await
        .map_err(|e| browser_error("releaseDataBuffer", e))?;

    let channel: Float32Array = get_function(&buffer, "getChannelData")?
        .call1(&buffer, &JsValue::from_f64(0.0))
        .map_err(|e| browser_error("getChannelData", e))?
        .dyn_into()
        .map_err(|_| DeckError::Browser {
            operation: "getChannelData".to_string(),
            reason: "not a Float32Array".to_string(),
        })?;
    let samples = channel.to_vec();

    // Give the storage back so the graph keeps recording into it.
    let restored = get_function(&buffer, "getAsAudioBuffer")
        .and_then(|f| {
            f.call1(&buffer, context)
                .map_err(|e| browser_error("getAsAudioBuffer", e))
        })
        .and_then(|audio| {
            get_function(device, "setDataBuffer")?
                .call2(device, &JsValue::from_str(name), &audio)
                .map_err(|e| browser_error("setDataBuffer", e))
        });
    match restored {
        Ok(pending) => {
            if let Ok(pending) = pending.dyn_into::<Promise>() {
                JsFuture::from(pending)
                    .await
                    .map_err(|e| browser_error("setDataBuffer", e))?;
            }
        }
        Err(e) => log::warn!("could not return data buffer '{name}': {e}"),
    }

    Ok(samples)
}

fn parameter_callback(sink: EventSink) -> Closure<dyn FnMut(JsValue)> {
    Closure::new(move |param: JsValue| {
        let name = get(&param, "id").ok().and_then(|v| v.as_string());
        let value = get(&param, "value").ok().and_then(|v| v.as_f64());
        if let (Some(name), Some(value)) = (name, value) {
            let _ = sink.send(DeviceEvent::ParameterChanged { name, value });
        }
    })
}

fn message_callback(sink: EventSink, buffers: BufferCache) -> Closure<dyn FnMut(JsValue)> {
    Closure::new(move |event: JsValue| {
        let Some(tag) = get(&event, "tag").ok().and_then(|v| v.as_string()) else {
            return;
        };
        let payload = get(&event, "payload")
            .map(|p| payload_values(&p))
            .unwrap_or_default();
        if let Ok(mut buffers) = buffers.try_borrow_mut() {
            buffers.insert(tag.clone(), payload.iter().map(|&v| v as f32).collect());
        }
        let _ = sink.send(DeviceEvent::Message { tag, payload });
    })
}

impl Device for WebDevice {
    fn parameter(&self, name: &str) -> Option<f64> {
        let param = self.parameter_object(name)?;
        get(&param, "value").ok()?.as_f64()
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> DeckResult<()> {
        let param = self
            .parameter_object(name)
            .ok_or_else(|| DeckError::ParameterNotFound(name.to_string()))?;
        Reflect::set(&param, &JsValue::from_str("value"), &JsValue::from_f64(value))
            .map_err(|e| browser_error("setting parameter", e))?;
        Ok(())
    }

    fn send_message(&mut self, tag: &str, payload: &[f64]) -> DeckResult<()> {
        let constructor = get_function(&self.runtime, "MessageEvent")?;
        let now = get(&self.runtime, "TimeNow")?;
        let values: Array = payload.iter().map(|&v| JsValue::from_f64(v)).collect();
        let event = Reflect::construct(
            &constructor,
            &Array::of3(&now, &JsValue::from_str(tag), &values),
        )
        .map_err(|e| browser_error("MessageEvent", e))?;

        get_function(&self.device, "scheduleEvent")?
            .call1(&self.device, &event)
            .map_err(|e| browser_error("scheduleEvent", e))?;
        Ok(())
    }

    fn data_buffer(&self, name: &str) -> Option<Vec<f32>> {
        let recorded = self.buffers.try_borrow().ok()?.get(name).cloned();
        recorded.or_else(|| self.messages.try_borrow().ok()?.get(name).cloned())
    }

    fn parameter_names(&self) -> Vec<String> {
        Array::from(&self.parameters.keys())
            .iter()
            .filter_map(|k| k.as_string())
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Page
// ═══════════════════════════════════════════════════════════════════════════

/// The live document.
///
/// Levels are published as the `--level` custom property (0..1) so the
/// stylesheet decides how sliders, rotaries and the progress bar render.
pub struct WebSurface {
    document: Document,
}

impl WebSurface {
    pub fn new(document: Document) -> Self {
        Self { document }
    }

    fn element(&self, element_id: &str) -> DeckResult<Element> {
        self.document
            .get_element_by_id(element_id)
            .ok_or_else(|| DeckError::ElementNotFound(element_id.to_string()))
    }
}

impl Surface for WebSurface {
    fn set_active(&mut self, element_id: &str, active: bool) -> DeckResult<()> {
        self.element(element_id)?
            .class_list()
            .toggle_with_force("active", active)
            .map_err(|e| browser_error("classList.toggle", e))?;
        Ok(())
    }

    fn set_level(&mut self, element_id: &str, level: f64) -> DeckResult<()> {
        let element: HtmlElement = self
            .element(element_id)?
            .dyn_into()
            .map_err(|_| DeckError::ElementNotFound(element_id.to_string()))?;
        element
            .style()
            .set_property("--level", &format!("{level:.4}"))
            .map_err(|e| browser_error("style.setProperty", e))
    }

    fn set_text(&mut self, element_id: &str, text: &str) -> DeckResult<()> {
        let element = self.element(element_id)?;
        match element.dyn_ref::<HtmlInputElement>() {
            Some(input) => input.set_value(text),
            None => element.set_text_content(Some(text)),
        }
        Ok(())
    }
}

/// A 2D canvas the waveform is stroked onto.
pub struct WebCanvas {
    canvas: HtmlCanvasElement,
    context: CanvasRenderingContext2d,
}

impl WebCanvas {
    pub fn find(document: &Document, element_id: &str) -> DeckResult<Self> {
        let canvas: HtmlCanvasElement = document
            .get_element_by_id(element_id)
            .ok_or_else(|| DeckError::ElementNotFound(element_id.to_string()))?
            .dyn_into()
            .map_err(|_| DeckError::ElementNotFound(element_id.to_string()))?;
        let context: CanvasRenderingContext2d = canvas
            .get_context("2d")
            .map_err(|e| browser_error("getContext", e))?
            .ok_or_else(|| DeckError::Browser {
                operation: "getContext".to_string(),
                reason: "2d context unavailable".to_string(),
            })?
            .unchecked_into();
        Ok(Self { canvas, context })
    }
}

impl Canvas for WebCanvas {
    fn size(&self) -> (u32, u32) {
        (self.canvas.width(), self.canvas.height())
    }

    fn clear(&mut self) {
        let (width, height) = self.size();
        self.context.clear_rect(0.0, 0.0, width as f64, height as f64);
        self.context.begin_path();
    }

    fn vertical_line(&mut self, x: f64, y_top: f64, y_bottom: f64) {
        self.context.move_to(x, y_top);
        self.context.line_to(x, y_bottom);
    }

    fn finish(&mut self) {
        self.context.stroke();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Runtime
// ═══════════════════════════════════════════════════════════════════════════

/// A `setInterval` timer, cleared on drop.
struct Interval {
    window: Window,
    handle: i32,
    _callback: Closure<dyn FnMut()>,
}

impl Interval {
    fn new(window: &Window, interval_ms: u32, tick: impl FnMut() + 'static) -> DeckResult<Self> {
        let callback = Closure::<dyn FnMut()>::new(tick);
        let handle = window
            .set_interval_with_callback_and_timeout_and_arguments_0(
                callback.as_ref().unchecked_ref(),
                interval_ms as i32,
            )
            .map_err(|e| browser_error("setInterval", e))?;
        Ok(Self {
            window: window.clone(),
            handle,
            _callback: callback,
        })
    }
}

impl Drop for Interval {
    fn drop(&mut self) {
        self.window.clear_interval_with_handle(self.handle);
    }
}

/// A document event listener, removed on drop.
struct Listener {
    target: EventTarget,
    kind: &'static str,
    callback: Closure<dyn FnMut(Event)>,
}

impl Listener {
    fn add(
        target: &EventTarget,
        kind: &'static str,
        handler: impl FnMut(Event) + 'static,
    ) -> DeckResult<Self> {
        let callback = Closure::<dyn FnMut(Event)>::new(handler);
        target
            .add_event_listener_with_callback(kind, callback.as_ref().unchecked_ref())
            .map_err(|e| browser_error("addEventListener", e))?;
        Ok(Self {
            target: target.clone(),
            kind,
            callback,
        })
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self
            .target
            .remove_event_listener_with_callback(self.kind, self.callback.as_ref().unchecked_ref());
    }
}

/// State shared by every listener and timer closure.
struct Shared {
    deck: RefCell<Deck<WebDevice>>,
    surface: RefCell<WebSurface>,
    canvas: RefCell<Option<WebCanvas>>,
    context: AudioContext,
    output: GainNode,
    patcher: JsValue,
    creating: Cell<bool>,
    stopped: Cell<bool>,
}

impl Shared {
    fn ui(&self, event: UiEvent) {
        let (Ok(mut deck), Ok(mut surface)) =
            (self.deck.try_borrow_mut(), self.surface.try_borrow_mut())
        else {
            log::debug!("deck busy, dropping {event:?}");
            return;
        };
        deck.handle_ui(event, &mut *surface);
    }

    fn poll(&self) {
        if let (Ok(mut deck), Ok(mut surface)) =
            (self.deck.try_borrow_mut(), self.surface.try_borrow_mut())
        {
            deck.poll_tick(&mut *surface);
        }
    }

    fn retry(&self) {
        if let Ok(mut deck) = self.deck.try_borrow_mut() {
            deck.retry_tick();
        }
    }

    fn redraw_waveform(&self) {
        if let (Ok(mut deck), Ok(mut canvas)) =
            (self.deck.try_borrow_mut(), self.canvas.try_borrow_mut())
        {
            if let Some(canvas) = canvas.as_mut() {
                // Draws the copy fetched on an earlier tick.
                if let (Some(device), Some(binding)) =
                    (deck.device(), deck.layout().waveform_binding())
                {
                    device.request_buffer(&binding.buffer);
                }
                deck.waveform_tick(canvas);
            }
        }
    }

    /// Every click resumes audio; the first one also creates the device.
    fn gesture(self: &Rc<Self>) {
        if let Err(e) = self.context.resume() {
            log::warn!("{}", browser_error("AudioContext.resume", e));
        }

        let awaiting = self
            .deck
            .try_borrow()
            .map(|deck| deck.state() == SessionState::AwaitingUserGesture)
            .unwrap_or(false);
        if !awaiting || self.creating.replace(true) {
            return;
        }

        let shared = Rc::clone(self);
        spawn_local(async move {
            shared.create_device().await;
            shared.creating.set(false);
        });
    }

    async fn create_device(&self) {
        let Ok(sink) = self.deck.try_borrow().map(|deck| deck.event_sink()) else {
            return;
        };
        let device = match WebDevice::create(&self.context, &self.output, &self.patcher, sink).await {
            Ok(device) => device,
            Err(e) => {
                log::error!("device creation failed, click again to retry: {e}");
                return;
            }
        };
        if self.stopped.get() {
            log::debug!("deck stopped while the device was being created");
            return;
        }
        match self.deck.try_borrow_mut() {
            Ok(mut deck) => {
                deck.activate(device).log_failure("activating device");
            }
            Err(_) => log::error!("deck busy, discarding new device"),
        }
    }
}

struct WebRuntime {
    shared: Rc<Shared>,
    timers: Vec<Interval>,
    listeners: Vec<Listener>,
}

impl Drop for WebRuntime {
    fn drop(&mut self) {
        self.timers.clear();
        self.listeners.clear();
        self.shared.stopped.set(true);
        if let Ok(mut deck) = self.shared.deck.try_borrow_mut() {
            deck.teardown();
        }
        if let Err(e) = self.shared.context.close() {
            log::warn!("{}", browser_error("AudioContext.close", e));
        }
    }
}

/// The nearest element carrying an id, starting at the event target.
fn element_id_of(event: &Event) -> Option<String> {
    let element: Element = event.target()?.dyn_into().ok()?;
    let element = element.closest("[id]").ok()??;
    let id = element.id();
    (!id.is_empty()).then_some(id)
}

fn pointer_y(event: &Event) -> Option<f64> {
    event.dyn_ref::<MouseEvent>().map(|m| m.client_y() as f64)
}

fn install_listeners(document: &Document, shared: &Rc<Shared>) -> DeckResult<Vec<Listener>> {
    let target: &EventTarget = document.as_ref();
    let mut listeners = Vec::new();

    let s = Rc::clone(shared);
    listeners.push(Listener::add(target, "click", move |event| {
        s.gesture();
        if let Some(element_id) = element_id_of(&event) {
            s.ui(UiEvent::Click { element_id });
        }
    })?);

    let s = Rc::clone(shared);
    listeners.push(Listener::add(target, "pointerdown", move |event| {
        if let (Some(element_id), Some(y)) = (element_id_of(&event), pointer_y(&event)) {
            s.ui(UiEvent::PointerDown { element_id, y });
        }
    })?);

    let s = Rc::clone(shared);
    listeners.push(Listener::add(target, "pointermove", move |event| {
        if let Some(y) = pointer_y(&event) {
            s.ui(UiEvent::PointerMove { y });
        }
    })?);

    let s = Rc::clone(shared);
    listeners.push(Listener::add(target, "pointerup", move |_| {
        s.ui(UiEvent::PointerUp);
    })?);

    let s = Rc::clone(shared);
    listeners.push(Listener::add(target, "change", move |event| {
        let input = event
            .target()
            .and_then(|t| t.dyn_into::<HtmlInputElement>().ok());
        if let Some(input) = input {
            let element_id = input.id();
            if !element_id.is_empty() {
                s.ui(UiEvent::Input {
                    element_id,
                    text: input.value(),
                });
            }
        }
    })?);

    Ok(listeners)
}

fn install_timers(window: &Window, config: &DeckConfig, shared: &Rc<Shared>) -> DeckResult<Vec<Interval>> {
    let poll = Rc::clone(shared);
    let retry = Rc::clone(shared);
    let waveform = Rc::clone(shared);
    Ok(vec![
        Interval::new(window, config.poll_interval_ms, move || poll.poll())?,
        Interval::new(window, config.retry_interval_ms, move || retry.retry())?,
        Interval::new(window, config.waveform_interval_ms, move || {
            waveform.redraw_waveform()
        })?,
    ])
}

async fn start(config_json: Option<String>) -> DeckResult<()> {
    if RUNTIME.with(|r| r.borrow().is_some()) {
        log::warn!("deck already started");
        return Ok(());
    }

    let config = match config_json {
        Some(text) => DeckConfig::from_json(&text)?,
        None => DeckConfig::default(),
    };
    let window = web_sys::window().ok_or_else(|| DeckError::Browser {
        operation: "window".to_string(),
        reason: "no global window".to_string(),
    })?;
    let document = window.document().ok_or_else(|| DeckError::Browser {
        operation: "document".to_string(),
        reason: "no document".to_string(),
    })?;

    let mut deck = Deck::new(config.clone(), Layout::standard())?;

    let description = load_graph(&window, &config.patch_url).await?;
    let mut registry = RuntimeRegistry::new(config.runtime_cdn.clone(), config.runtime_file.clone());
    ensure_runtime(&document, &mut registry, description.runtime_version()).await?;
    let patcher = js_sys::JSON::parse(&description.raw().to_string())
        .map_err(|e| browser_error("JSON.parse", e))?;

    let context = AudioContext::new().map_err(|e| browser_error("AudioContext", e))?;
    let output = context
        .create_gain()
        .map_err(|e| browser_error("createGain", e))?;
    output
        .connect_with_audio_node(&context.destination())
        .map_err(|e| browser_error("connecting output", e))?;

    deck.resources_loaded(description);

    let mut surface = WebSurface::new(document.clone());
    deck.render_all(&mut surface);
    let canvas = deck
        .layout()
        .waveform_binding()
        .and_then(|w| WebCanvas::find(&document, &w.element_id).log_failure("waveform canvas"));

    let shared = Rc::new(Shared {
        deck: RefCell::new(deck),
        surface: RefCell::new(surface),
        canvas: RefCell::new(canvas),
        context,
        output,
        patcher,
        creating: Cell::new(false),
        stopped: Cell::new(false),
    });

    let runtime = WebRuntime {
        timers: install_timers(&window, &config, &shared)?,
        listeners: install_listeners(&document, &shared)?,
        shared,
    };

    RUNTIME.with(|r| {
        let mut slot = r.borrow_mut();
        if slot.is_some() {
            log::warn!("a concurrent start won, discarding this one");
        } else {
            *slot = Some(runtime);
            log::info!("deck ready, click to start audio");
        }
    });
    Ok(())
}
