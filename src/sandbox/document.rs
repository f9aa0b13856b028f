//! Sandbox document construction.
//!
//! The document is self-contained apart from the pinned runtime scripts
//! (React, ReactDOM, Babel standalone). Layout, in load order:
//!
//! 1. CSP meta: scripts from the runtime origins plus inline/eval, nothing else.
//! 2. Runtime scripts.
//! 3. Message channel: error/rejection listeners bound to the run token.
//! 4. UI-primitive shims, each installed only if the name is still unbound.
//! 5. The sanitized user code as an inert JSON payload.
//! 6. Mount block: transform, evaluate, resolve the injected entry, render,
//!    then post the ready signal after the settle delay.

use crate::sandbox::entry::EntryPoint;
use crate::sandbox::message::MessageKind;
use crate::sandbox::{RunId, RunMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(300);

pub const DEFAULT_RUNTIME_SCRIPTS: &[&str] = &[
    "https://unpkg.com/react@18.3.1/umd/react.production.min.js",
    "https://unpkg.com/react-dom@18.3.1/umd/react-dom.production.min.js",
    "https://unpkg.com/@babel/standalone@7.24.7/babel.min.js",
];

const USER_CODE_ELEMENT_ID: &str = "shadowheal-user-code";

const DEFAULT_ICONS: &[&str] = &[
    "Activity", "AlertCircle", "AlertTriangle", "ArrowDown", "ArrowLeft", "ArrowRight",
    "ArrowUp", "ArrowUpRight", "Bell", "Bookmark", "Calendar", "Camera", "Check",
    "CheckCircle", "ChevronDown", "ChevronLeft", "ChevronRight", "ChevronUp", "Clock",
    "Code", "Copy", "CreditCard", "Download", "Edit", "ExternalLink", "Eye", "EyeOff",
    "Facebook", "FileText", "Filter", "Github", "Globe", "Heart", "Home", "Image", "Info",
    "Instagram", "Layers", "Link", "Linkedin", "Loader2", "Lock", "LogIn", "LogOut", "Mail",
    "MapPin", "Menu", "MessageCircle", "MessageSquare", "Minus", "Moon", "MoreHorizontal",
    "MoreVertical", "Music", "Package", "Pause", "Phone", "Play", "Plus", "RefreshCw",
    "Rocket", "Search", "Send", "Settings", "Share", "Share2", "Shield", "ShoppingBag",
    "ShoppingCart", "Sparkles", "Star", "Sun", "Tag", "Trash", "Trash2", "TrendingUp",
    "Twitter", "Upload", "User", "Users", "Video", "Wand2", "X", "XCircle", "Youtube", "Zap",
];

const DEFAULT_COMPONENTS: &[(&str, &str)] = &[
    ("Button", "button"),
    ("Card", "div"),
    ("CardHeader", "div"),
    ("CardTitle", "h3"),
    ("CardDescription", "p"),
    ("CardContent", "div"),
    ("CardFooter", "div"),
    ("Input", "input"),
    ("Textarea", "textarea"),
    ("Label", "label"),
    ("Badge", "span"),
    ("Separator", "hr"),
    ("Avatar", "span"),
    ("AvatarImage", "img"),
    ("AvatarFallback", "span"),
    ("Tabs", "div"),
    ("TabsList", "div"),
    ("TabsTrigger", "button"),
    ("TabsContent", "div"),
    ("Switch", "button"),
    ("Checkbox", "input"),
    ("Progress", "div"),
    ("Skeleton", "div"),
    ("ScrollArea", "div"),
    ("Dialog", "div"),
    ("DialogTrigger", "div"),
    ("DialogContent", "div"),
    ("DialogHeader", "div"),
    ("DialogTitle", "h2"),
    ("DialogDescription", "p"),
    ("Tooltip", "span"),
    ("TooltipTrigger", "span"),
    ("TooltipContent", "span"),
    ("TooltipProvider", "div"),
    ("Select", "div"),
    ("SelectTrigger", "button"),
    ("SelectValue", "span"),
    ("SelectContent", "div"),
    ("SelectItem", "div"),
    ("Accordion", "div"),
    ("AccordionItem", "div"),
    ("AccordionTrigger", "button"),
    ("AccordionContent", "div"),
];

const CHANNEL_JS: &str = r#"(function () {
  var RUN_ID = "__RUN_ID__";
  var READY_TYPE = "__READY_TYPE__";
  var ERROR_TYPE = "__ERROR_TYPE__";
  var SETTLE_MS = __SETTLE_MS__;
  var state = { errored: false, ready: false, seen: {} };

  function post(payload) {
    payload.runId = RUN_ID;
    try {
      if (typeof window.__shadowhealBridge === "function") {
        window.__shadowhealBridge(JSON.stringify(payload));
      } else if (window.parent && window.parent !== window) {
        window.parent.postMessage(payload, "*");
      }
    } catch (ignored) {}
  }

  function describe(value) {
    if (value === undefined || value === null) return "";
    if (typeof value === "string") return value;
    if (value && typeof value.message === "string") return value.message;
    try { return JSON.stringify(value); } catch (ignored) { return String(value); }
  }

  function reportError(source, error, line, col) {
    var message = describe(error) || "Unknown error";
    var key = source + ":" + message;
    if (state.seen[key]) return;
    state.seen[key] = true;
    state.errored = true;
    post({
      type: ERROR_TYPE,
      message: message,
      stack: error && error.stack ? String(error.stack) : "",
      source: source,
      line: typeof line === "number" ? line : undefined,
      col: typeof col === "number" ? col : undefined
    });
  }

  function reportReady() {
    setTimeout(function () {
      if (state.errored || state.ready) return;
      state.ready = true;
      post({ type: READY_TYPE });
    }, SETTLE_MS);
  }

  window.addEventListener("error", function (event) {
    reportError("window.onerror", event.error || event.message, event.lineno, event.colno);
  });
  window.addEventListener("unhandledrejection", function (event) {
    reportError("unhandledrejection", event.reason);
  });

  window.__shadowheal = { runId: RUN_ID, reportError: reportError, reportReady: reportReady };
})();"#;

const SHIM_JS: &str = r#"(function () {
  var g = window;
  var React = g.React;
  if (!React) return;
  var h = React.createElement;

  function define(name, value) {
    if (typeof g[name] === "undefined") g[name] = value;
  }

  var MOTION_PROPS = ["initial", "animate", "exit", "transition", "variants", "whileHover",
    "whileTap", "whileInView", "whileFocus", "whileDrag", "layout", "layoutId", "drag",
    "dragConstraints", "viewport", "onAnimationComplete", "asChild"];

  function domProps(props) {
    var out = {};
    for (var key in props) {
      if (key === "children" || MOTION_PROPS.indexOf(key) !== -1) continue;
      out[key] = props[key];
    }
    return out;
  }

  function icon(name) {
    var Icon = function (props) {
      props = props || {};
      var size = props.size || 24;
      return h("svg", {
        width: size, height: size, viewBox: "0 0 24 24", fill: "none",
        stroke: props.color || "currentColor", strokeWidth: props.strokeWidth || 2,
        className: props.className, "data-icon": name, "aria-hidden": "true"
      }, h("rect", { x: 4, y: 4, width: 16, height: 16, rx: 3 }));
    };
    Icon.displayName = name;
    return Icon;
  }

  function passthrough(tag, name) {
    var Component = React.forwardRef(function (props, ref) {
      var rest = domProps(props);
      rest.ref = ref;
      return h(tag, rest, props.children);
    });
    Component.displayName = name;
    return Component;
  }

  __ICONS__.forEach(function (name) { define(name, icon(name)); });
  __COMPONENTS__.forEach(function (pair) { define(pair[0], passthrough(pair[1], pair[0])); });

  var motionCache = {};
  define("motion", new Proxy({}, {
    get: function (_, tag) {
      var key = String(tag);
      if (!motionCache[key]) motionCache[key] = passthrough(key, "motion." + key);
      return motionCache[key];
    }
  }));
  define("AnimatePresence", function (props) { return h(React.Fragment, null, props.children); });
  define("useAnimation", function () {
    return { start: function () { return Promise.resolve(); }, stop: function () {}, set: function () {} };
  });
  define("useInView", function () { return true; });
  define("useReducedMotion", function () { return false; });

  ["useState", "useEffect", "useLayoutEffect", "useRef", "useMemo", "useCallback",
   "useReducer", "useContext", "useId", "useTransition", "createContext", "forwardRef",
   "memo", "Fragment"].forEach(function (name) { define(name, React[name]); });

  define("cn", function () {
    return Array.prototype.slice.call(arguments).filter(Boolean).join(" ");
  });
  define("toast", Object.assign(function () {}, {
    success: function () {}, error: function () {}, info: function () {}
  }));
})();"#;

const MOUNT_JS: &str = r#"(function () {
  var sh = window.__shadowheal;
  var ENTRY = "__ENTRY__";
  var React = window.React;
  var ReactDOM = window.ReactDOM;
  if (!React || !ReactDOM) {
    sh.reportError("mount", new Error("React runtime unavailable in sandbox"));
    return;
  }

  var source;
  try {
    source = JSON.parse(document.getElementById("__CODE_ID__").textContent);
  } catch (e) {
    sh.reportError("transform", e);
    return;
  }

  var compiled = source;
  if (window.Babel) {
    try {
      compiled = window.Babel.transform(source, {
        filename: "component.tsx",
        presets: [["typescript", { isTSX: true, allExtensions: true }], "react"]
      }).code;
    } catch (e) {
      sh.reportError("transform", e);
      return;
    }
  }

  try {
    (0, eval)(compiled + "\n;window.__shadowhealEntry = (typeof " + ENTRY + " !== 'undefined') ? " + ENTRY + " : undefined;");
  } catch (e) {
    sh.reportError("mount", e);
    return;
  }

  var Entry = window.__shadowhealEntry;
  var renderable = typeof Entry === "function" || (Entry && typeof Entry === "object" && Entry.$$typeof);
  if (!renderable) {
    sh.reportError("mount", new Error("Entry component `" + ENTRY + "` is not renderable"));
    return;
  }

  class Boundary extends React.Component {
    componentDidCatch(error) { sh.reportError("mount", error); }
    static getDerivedStateFromError() { return { failed: true }; }
    render() { return this.state && this.state.failed ? null : this.props.children; }
  }

  try {
    var element = React.createElement(Boundary, null, React.createElement(Entry));
    var container = document.getElementById("root");
    if (ReactDOM.createRoot) {
      ReactDOM.createRoot(container).render(element);
    } else {
      ReactDOM.render(element, container);
    }
  } catch (e) {
    sh.reportError("mount", e);
    return;
  }
  sh.reportReady();
})();"#;

/// Names stubbed in every document so unbound references do not fail spuriously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShimSet {
    pub icons: Vec<String>,
    /// `(component name, host tag)` pairs rendered as passthrough elements.
    pub components: Vec<(String, String)>,
}

impl Default for ShimSet {
    fn default() -> Self {
        Self {
            icons: DEFAULT_ICONS.iter().map(|s| s.to_string()).collect(),
            components: DEFAULT_COMPONENTS
                .iter()
                .map(|(name, tag)| (name.to_string(), tag.to_string()))
                .collect(),
        }
    }
}

impl ShimSet {
    pub fn contains(&self, name: &str) -> bool {
        self.icons.iter().any(|i| i == name) || self.components.iter().any(|(c, _)| c == name)
    }
}

/// Inputs to document construction that do not vary per run.
#[derive(Debug, Clone)]
pub struct DocumentOptions {
    pub runtime_scripts: Vec<String>,
    pub settle_delay: Duration,
    pub shims: ShimSet,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            runtime_scripts: DEFAULT_RUNTIME_SCRIPTS.iter().map(|s| s.to_string()).collect(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            shims: ShimSet::default(),
        }
    }
}

/// A fully assembled, self-contained sandbox document.
#[derive(Debug, Clone)]
pub struct SandboxDocument {
    run_id: RunId,
    mode: RunMode,
    entry: String,
    html: String,
}

impl SandboxDocument {
    pub fn build(
        code: &str,
        entry: &EntryPoint,
        run_id: RunId,
        mode: RunMode,
        options: &DocumentOptions,
    ) -> Self {
        let run_token = run_id.to_string();
        let channel = CHANNEL_JS
            .replace("__RUN_ID__", &run_token)
            .replace("__READY_TYPE__", MessageKind::ready(mode).as_str())
            .replace("__ERROR_TYPE__", MessageKind::error(mode).as_str())
            .replace("__SETTLE_MS__", &options.settle_delay.as_millis().to_string());

        let shims = SHIM_JS
            .replace("__ICONS__", &to_js_literal(&options.shims.icons))
            .replace("__COMPONENTS__", &to_js_literal(&options.shims.components));

        let mount = MOUNT_JS
            .replace("__ENTRY__", &entry.name)
            .replace("__CODE_ID__", USER_CODE_ELEMENT_ID);

        let runtime_tags: String = options
            .runtime_scripts
            .iter()
            .map(|src| format!("<script src=\"{}\" crossorigin></script>\n", escape_attr(src)))
            .collect();

        let csp = content_security_policy(&options.runtime_scripts);

        let html = format!(
            "<!DOCTYPE html>\n\
             <html lang=\"en\" data-shadowheal-mode=\"{mode}\">\n\
             <head>\n\
             <meta charset=\"utf-8\">\n\
             <meta http-equiv=\"Content-Security-Policy\" content=\"{csp}\">\n\
             <meta name=\"shadowheal-run\" content=\"{run}\">\n\
             <style>html,body{{margin:0;padding:0}}#root{{min-height:100vh}}</style>\n\
             {runtime}\
             </head>\n\
             <body>\n\
             <div id=\"root\"></div>\n\
             <script>\n{channel}\n</script>\n\
             <script>\n{shims}\n</script>\n\
             <script id=\"{code_id}\" type=\"application/json\">{code}</script>\n\
             <script>\n{mount}\n</script>\n\
             </body>\n\
             </html>\n",
            mode = mode.as_str(),
            csp = escape_attr(&csp),
            run = run_token,
            runtime = runtime_tags,
            channel = channel,
            shims = shims,
            code_id = USER_CODE_ELEMENT_ID,
            code = embed_code(code),
            mount = mount,
        );

        Self {
            run_id,
            mode,
            entry: entry.name.clone(),
            html,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn into_html(self) -> String {
        self.html
    }
}

/// JSON-encode user code for an inert `application/json` script element.
///
/// `<` is escaped so no sequence in the payload can close the element.
fn embed_code(code: &str) -> String {
    serde_json::to_string(code)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace('<', "\\u003c")
}

fn to_js_literal<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "[]".to_string())
        .replace('<', "\\u003c")
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn script_origin(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let host = rest.split('/').next().filter(|h| !h.is_empty())?;
    Some(format!("{}://{}", scheme, host))
}

fn content_security_policy(runtime_scripts: &[String]) -> String {
    let mut origins: Vec<String> = runtime_scripts
        .iter()
        .filter_map(|s| script_origin(s))
        .collect();
    origins.sort();
    origins.dedup();

    let mut script_src = String::from("'unsafe-inline' 'unsafe-eval'");
    for origin in &origins {
        script_src.push(' ');
        script_src.push_str(origin);
    }

    format!(
        "default-src 'none'; script-src {}; style-src 'unsafe-inline'; img-src data: blob:; \
         font-src data:; connect-src 'none'; frame-src 'none'; child-src 'none'; \
         form-action 'none'; base-uri 'none'",
        script_src
    )
}
