//! Functional components: the unit that travels on a handler's outbound
//! channel.
//!
//! An [`FnComponent`] couples buffered markup with the placement, or the
//! alternative action (class change, redirect, client call, error), that
//! the outbound loop turns into a [`Dispatch`]. It carries the
//! [`RouteContext`] it was built from, which names the target connection.

use livefn_core::{CustomPayload, Dispatch, EventPayload, Payload, RedirectPayload, RenderPayload};
use serde_json::Value;
use tracing::warn;

use crate::context::{HandleFn, RouteContext};
use crate::errors::{Result, RuntimeError};
use crate::listeners::EventListener;

/// Anything that can write markup.
pub trait Component {
    /// Append this component's markup to `out`.
    fn render(&self, out: &mut String);
}

/// Pre-rendered markup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Html(pub String);

impl Component for Html {
    fn render(&self, out: &mut String) {
        out.push_str(&self.0);
    }
}

impl Component for &str {
    fn render(&self, out: &mut String) {
        out.push_str(self);
    }
}

impl Component for String {
    fn render(&self, out: &mut String) {
        out.push_str(self);
    }
}

/// Prefix of every component element ID.
pub const ELEMENT_ID_PREFIX: &str = "fncmp-";

/// Strip the characters the client's HTML parser would turn into stray text
/// nodes.
pub fn sanitize_html(html: &str) -> String {
    html.chars().filter(|c| !matches!(c, '\n' | '\t')).collect()
}

/// A server-rendered fragment and the instruction for placing it.
pub struct FnComponent {
    id: String,
    label: String,
    render: RenderPayload,
    markup: String,
    action: Option<Payload>,
    context: RouteContext,
}

impl FnComponent {
    /// An empty component that swaps the children of `<main>`.
    pub fn new(context: RouteContext) -> Self {
        Self {
            id: format!("{ELEMENT_ID_PREFIX}{}", uuid::Uuid::now_v7()),
            label: String::new(),
            render: RenderPayload {
                tag: "main".into(),
                inner: true,
                ..RenderPayload::default()
            },
            markup: String::new(),
            action: None,
            context,
        }
    }

    /// Element ID of the wrapping `<div>`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The context the component was built from.
    pub fn context(&self) -> &RouteContext {
        &self.context
    }

    /// Placement and listener bindings.
    pub fn placement(&self) -> &RenderPayload {
        &self.render
    }

    /// Append a child component's markup.
    #[must_use]
    pub fn child(mut self, component: impl Component) -> Self {
        component.render(&mut self.markup);
        self
    }

    /// Append another functional component, wrapper and listener bindings
    /// included, so the client attaches its listeners with this render.
    #[must_use]
    pub fn nest(mut self, child: FnComponent) -> Self {
        self.markup.push_str(&child.render_markup());
        self.render.event_listeners.extend(child.render.event_listeners);
        self
    }

    /// Whether anything would be rendered inside the wrapper.
    pub fn has_markup(&self) -> bool {
        !self.markup.is_empty() || !self.render.html.is_empty()
    }

    fn place(mut self, target_id: &str, tag: &str, set: impl FnOnce(&mut RenderPayload)) -> Self {
        let listeners = std::mem::take(&mut self.render.event_listeners);
        let html = std::mem::take(&mut self.render.html);
        self.render = RenderPayload {
            target_id: target_id.to_owned(),
            tag: tag.to_owned(),
            html,
            event_listeners: listeners,
            ..RenderPayload::default()
        };
        set(&mut self.render);
        self
    }

    /// Append inside every element with `tag`.
    #[must_use]
    pub fn append_tag(self, tag: &str) -> Self {
        self.place("", tag, |r| r.append = true)
    }

    /// Prepend inside every element with `tag`.
    #[must_use]
    pub fn prepend_tag(self, tag: &str) -> Self {
        self.place("", tag, |r| r.prepend = true)
    }

    /// Replace the children of every element with `tag`.
    #[must_use]
    pub fn swap_tag_inner(self, tag: &str) -> Self {
        self.place("", tag, |r| r.inner = true)
    }

    /// Replace every element with `tag`.
    #[must_use]
    pub fn swap_tag_outer(self, tag: &str) -> Self {
        self.place("", tag, |r| r.outer = true)
    }

    /// Append inside the element with `target_id`.
    #[must_use]
    pub fn append_element(self, target_id: &str) -> Self {
        self.place(target_id, "", |r| r.append = true)
    }

    /// Prepend inside the element with `target_id`.
    #[must_use]
    pub fn prepend_element(self, target_id: &str) -> Self {
        self.place(target_id, "", |r| r.prepend = true)
    }

    /// Replace the children of the element with `target_id`.
    #[must_use]
    pub fn swap_element_inner(self, target_id: &str) -> Self {
        self.place(target_id, "", |r| r.inner = true)
    }

    /// Replace the element with `target_id`.
    #[must_use]
    pub fn swap_element_outer(self, target_id: &str) -> Self {
        self.place(target_id, "", |r| r.outer = true)
    }

    /// Remove the element with `target_id`.
    #[must_use]
    pub fn remove_element(self, target_id: &str) -> Self {
        self.place(target_id, "", |r| r.remove = true)
    }

    /// Remove every element with `tag`.
    #[must_use]
    pub fn remove_tag(self, tag: &str) -> Self {
        self.place("", tag, |r| r.remove = true)
    }

    /// Set the debug label, also rendered as an attribute.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Navigate the client instead of rendering.
    #[must_use]
    pub fn with_redirect(self, url: impl Into<String>) -> Self {
        self.with_action(Payload::Redirect(RedirectPayload { url: url.into() }))
    }

    /// Report an error to the client instead of rendering.
    #[must_use]
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.with_action(Payload::error(message))
    }

    /// Call a named client function instead of rendering.
    #[must_use]
    pub fn js(self, function: impl Into<String>, arg: Value) -> Self {
        self.with_action(Payload::Custom(CustomPayload {
            function: function.into(),
            data: arg,
            result: Value::Null,
        }))
    }

    #[must_use]
    pub(crate) fn with_action(mut self, payload: Payload) -> Self {
        self.action = Some(payload);
        self
    }

    /// Register `handler` for each event kind on this component's element.
    ///
    /// Listeners are scoped to the context's connection. Without one there
    /// is nobody to deliver events to, and nothing is registered.
    #[must_use]
    pub fn with_events(mut self, handler: &HandleFn, kinds: &[&str]) -> Self {
        let Some(conn_id) = self.context.conn_id().cloned() else {
            warn!(element_id = %self.id, "no connection in context, event listeners not registered");
            return self;
        };
        let registry = self.context.runtime().listeners();
        for kind in kinds {
            let listener = EventListener::new(
                self.id.clone(),
                *kind,
                std::sync::Arc::clone(self.context.request_arc()),
                std::sync::Arc::clone(handler),
            );
            let listener = registry.add(&conn_id, listener);
            self.render.event_listeners.push(listener.payload());
        }
        self
    }

    /// Replace the session binding with `ctx`'s.
    #[must_use]
    pub(crate) fn bound_to(mut self, ctx: &RouteContext) -> Self {
        self.context = self.context.rebind(ctx);
        self
    }

    /// The wrapper `<div>` with listener bindings, payload HTML and markup.
    pub fn render_markup(&self) -> String {
        let events = serde_json::to_string(&self.render.event_listeners)
            .unwrap_or_else(|_| "[]".to_owned())
            .replace('\'', "&#39;");
        let mut out = format!("<div id='{}'", self.id);
        if !self.label.is_empty() {
            out.push_str(&format!(" label='{}'", self.label));
        }
        out.push_str(&format!(" events='{events}'>"));
        out.push_str(&self.render.html);
        out.push_str(&self.markup);
        out.push_str("</div>");
        out
    }

    /// The envelope this component publishes as.
    pub fn to_dispatch(&self) -> Dispatch {
        let payload = match &self.action {
            Some(action) => action.clone(),
            None => {
                let mut render = self.render.clone();
                render.html = if self.has_markup() {
                    sanitize_html(&self.render_markup())
                } else {
                    String::new()
                };
                Payload::Render(render)
            }
        };
        let mut dispatch = Dispatch::new(self.id.clone(), payload);
        dispatch.label.clone_from(&self.label);
        match (self.context.conn_id(), self.context.handler_id()) {
            (Some(conn_id), Some(handler_id)) => dispatch.routed(conn_id.clone(), handler_id.clone()),
            _ => dispatch,
        }
    }

    /// Push onto the owning handler's outbound channel now.
    pub async fn dispatch(self) -> Result<()> {
        let handler_id = self
            .context
            .handler_id()
            .cloned()
            .ok_or(RuntimeError::MissingContext("dispatch"))?;
        let handler = self
            .context
            .runtime()
            .handlers()
            .get(&handler_id)
            .ok_or(RuntimeError::HandlerNotFound(handler_id))?;
        handler.submit(self).await
    }

    /// Listener bindings registered so far.
    pub fn event_listeners(&self) -> &[EventPayload] {
        &self.render.event_listeners
    }
}

impl std::fmt::Debug for FnComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnComponent")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("action", &self.action.as_ref().map(Payload::tag))
            .field("markup_len", &self.markup.len())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RequestInfo, handle_fn};
    use crate::runtime::Runtime;
    use assert_matches::assert_matches;
    use livefn_core::{ConnId, FunctionTag, HandlerId, ListenerId};
    use livefn_settings::LiveSettings;
    use serde_json::json;

    fn plain() -> RouteContext {
        RouteContext::new(Runtime::new(LiveSettings::default()).unwrap(), RequestInfo::default())
    }

    fn bound() -> RouteContext {
        plain().bind_ids(ConnId::from("c1"), HandlerId::from("h1"))
    }

    fn noop() -> HandleFn {
        handle_fn(|ctx| async move { FnComponent::new(ctx) })
    }

    #[tokio::test]
    async fn default_placement_swaps_main_children() {
        let c = FnComponent::new(plain());
        assert!(c.id().starts_with(ELEMENT_ID_PREFIX));
        assert_eq!(c.placement().tag, "main");
        assert!(c.placement().inner);
        assert!(!c.has_markup());
    }

    #[tokio::test]
    async fn element_ids_are_unique_time_ordered_uuids() {
        let a = FnComponent::new(plain());
        let b = FnComponent::new(plain());
        assert_ne!(a.id(), b.id());
        let uuid = uuid::Uuid::parse_str(&a.id()[ELEMENT_ID_PREFIX.len()..]).unwrap();
        assert_eq!(uuid.get_version(), Some(uuid::Version::SortRand));
    }

    #[tokio::test]
    async fn placement_builders_replace_previous_mode() {
        let c = FnComponent::new(plain()).append_element("list");
        let r = c.placement();
        assert_eq!(r.target_id, "list");
        assert!(r.tag.is_empty());
        assert!(r.append && !r.inner);

        let c = c.swap_tag_outer("section");
        let r = c.placement();
        assert!(r.target_id.is_empty());
        assert_eq!(r.tag, "section");
        assert!(r.outer && !r.append);
    }

    #[tokio::test]
    async fn render_markup_wraps_children() {
        let c = FnComponent::new(plain())
            .with_label("greeting")
            .child("<p>hi</p>")
            .child(Html("<p>there</p>".into()));
        let html = c.render_markup();
        assert_eq!(
            html,
            format!(
                "<div id='{}' label='greeting' events='[]'><p>hi</p><p>there</p></div>",
                c.id()
            )
        );
    }

    #[tokio::test]
    async fn render_dispatch_strips_newlines_and_tabs() {
        let c = FnComponent::new(bound()).child("<ul>\n\t<li>a</li>\n</ul>");
        let d = c.to_dispatch();
        assert_eq!(d.function(), FunctionTag::Render);
        assert_eq!(d.conn_id.as_str(), "c1");
        assert_eq!(d.handler_id.as_str(), "h1");
        assert_eq!(d.key, c.id());
        let Payload::Render(r) = d.payload else {
            panic!("expected render");
        };
        assert!(r.html.contains("<ul><li>a</li></ul>"));
        assert!(!r.html.contains('\n'));
    }

    #[tokio::test]
    async fn empty_render_has_no_html() {
        let d = FnComponent::new(bound()).to_dispatch();
        assert_matches!(d.payload, Payload::Render(ref r) if r.html.is_empty());
    }

    #[tokio::test]
    async fn actions_override_render() {
        let d = FnComponent::new(bound()).with_redirect("/login").to_dispatch();
        assert_matches!(d.payload, Payload::Redirect(ref r) if r.url == "/login");

        let d = FnComponent::new(bound()).with_error("nope").to_dispatch();
        assert_eq!(d.function(), FunctionTag::Error);

        let d = FnComponent::new(bound())
            .js("console.log", json!(["a", 1]))
            .to_dispatch();
        assert_matches!(d.payload, Payload::Custom(ref c) if c.function == "console.log" && c.data[1] == 1);
    }

    #[tokio::test]
    async fn with_events_registers_listeners() {
        let ctx = bound();
        let c = FnComponent::new(ctx.clone()).with_events(&noop(), &["click", "input"]);
        assert_eq!(c.event_listeners().len(), 2);
        assert!(c.event_listeners().iter().all(|e| e.target_id == c.id()));

        let listeners = ctx.runtime().listeners();
        let conn = ConnId::from("c1");
        assert_eq!(listeners.count(&conn), 2);
        let first = ListenerId::from(c.event_listeners()[0].id.as_str());
        assert_eq!(listeners.get(&first, &conn).unwrap().on, "click");

        let markup = c.child("x").render_markup();
        assert!(markup.contains("\"on\":\"click\""));
    }

    #[tokio::test]
    async fn nested_listeners_are_hoisted() {
        let ctx = bound();
        let button = FnComponent::new(ctx.clone())
            .with_events(&noop(), &["click"])
            .child("<button>+</button>");
        let button_id = button.id().to_owned();
        let page = FnComponent::new(ctx).child("<h1>t</h1>").nest(button);
        assert_eq!(page.event_listeners().len(), 1);
        assert_eq!(page.event_listeners()[0].target_id, button_id);
        let html = page.render_markup();
        assert!(html.contains(&format!("<div id='{button_id}'")));
        assert!(html.contains("<button>+</button></div></div>"));
    }

    #[tokio::test]
    async fn with_events_without_session_registers_nothing() {
        let c = FnComponent::new(plain()).with_events(&noop(), &["click"]);
        assert!(c.event_listeners().is_empty());
    }

    #[tokio::test]
    async fn listeners_survive_placement_change() {
        let c = FnComponent::new(bound())
            .with_events(&noop(), &["click"])
            .swap_element_outer("row-1");
        assert_eq!(c.event_listeners().len(), 1);
        assert_eq!(c.placement().target_id, "row-1");
    }

    #[tokio::test]
    async fn dispatch_without_session_is_missing_context() {
        let err = FnComponent::new(plain()).dispatch().await.unwrap_err();
        assert_matches!(err, RuntimeError::MissingContext("dispatch"));
    }

    #[test]
    fn sanitize_removes_only_newlines_and_tabs() {
        assert_eq!(sanitize_html("a\n\tb c\r"), "ab c\r");
    }
}
