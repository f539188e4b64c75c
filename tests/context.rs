mod support;

use cascade::prelude::*;
use cascade::MemoryDestination;

use support::{strip_markers, visible};

fn render(node: Node) -> (Request, MemoryDestination) {
    let request = Request::new(node, RenderOptions::default(), Callbacks::new());
    let output = MemoryDestination::new();
    request.start_work();
    request.start_flowing(output.clone());
    (request, output)
}

fn themed(theme: &Context<&'static str>, gate: &Deferred<()>) -> Node {
    let (theme, gate) = (theme.clone(), gate.clone());
    component("Themed", move |scope| {
        scope.wait(&gate)?;
        Ok(element("span").child(*scope.read(&theme)).into())
    })
}

#[test]
fn provided_values_survive_a_suspension() {
    let theme = Context::new("light");
    let gate = Deferred::new();
    let (_request, output) = render(fragment([
        provider(&theme, "dark", suspense("…", themed(&theme, &gate))),
        themed(&theme, &Deferred::resolved(())),
    ]));
    assert!(!output.is_closed());

    gate.resolve(());
    assert!(output.is_closed());
    assert_eq!(visible(&output.text()), "<span>dark</span><span>light</span>");
}

#[test]
fn nested_providers_restore_the_outer_value() {
    let depth = Context::new(0u8);
    let show = |depth: &Context<u8>| {
        let depth = depth.clone();
        component("Depth", move |scope| Ok(text(scope.read(&depth).to_string())))
    };
    let (_request, output) = render(fragment([
        provider(
            &depth,
            1,
            fragment([provider(&depth, 2, show(&depth)), show(&depth)]),
        ),
        show(&depth),
    ]));
    assert_eq!(strip_markers(&output.text()), "210");
}

fn labelled(gate: Option<Deferred<()>>) -> Node {
    component("Field", move |scope| {
        if let Some(gate) = &gate {
            scope.wait(gate)?;
        }
        let id = scope.use_id();
        Ok(fragment([
            Node::from(element("label").attr("for", id.clone()).child("Name")),
            Node::from(element("input").attr("id", id)),
        ]))
    })
}

fn form(gate: Option<Deferred<()>>) -> Node {
    element("form")
        .children([
            labelled(None),
            suspense("…", labelled(gate)),
            labelled(None),
        ])
        .into()
}

#[test]
fn ids_do_not_depend_on_suspension() {
    let gate = Deferred::new();
    let (_request, streamed) = render(form(Some(gate.clone())));
    gate.resolve(());
    assert!(streamed.is_closed());

    let (_request, direct) = render(form(None));

    let streamed = visible(&streamed.text());
    assert_eq!(streamed, visible(&direct.text()));

    let ids: Vec<&str> = streamed
        .split("id=\"")
        .skip(1)
        .filter_map(|rest| rest.split('"').next())
        .collect();
    assert_eq!(ids.len(), 3);
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
    assert!(ids.iter().all(|id| id.starts_with(":R") && id.ends_with(':')));
}

#[test]
fn identifier_prefix_is_applied_everywhere() {
    let gate = Deferred::new();
    let request = Request::new(
        form(Some(gate.clone())),
        RenderOptions::default().identifier_prefix("app-"),
        Callbacks::new(),
    );
    let output = MemoryDestination::new();
    request.start_work();
    request.start_flowing(output.clone());
    gate.resolve(());

    let html = output.text();
    assert!(html.contains("<template id=\"app-B:0\"></template>"));
    assert!(html.contains("<div hidden id=\"app-S:0\">"));
    assert!(html.contains("id=\":app-R"));
}
