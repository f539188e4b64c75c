mod support;

use cascade::prelude::*;
use cascade::{BoundaryState, MemoryDestination, RenderError, RequestStatus, render_to_vec};
use futures::StreamExt;
use futures::executor::block_on;

use support::{drain, init_tracing, visible};

fn letters(content: &Deferred<Node>) -> Node {
    fragment([text("A"), suspense("F", await_node(content)), text("C")])
}

#[test]
fn fallback_streams_first_and_content_follows() {
    init_tracing();
    let content = Deferred::new();
    let request = Request::new(letters(&content), RenderOptions::default(), Callbacks::new());
    let output = MemoryDestination::with_budget(1);

    request.start_work();
    request.start_flowing(output.clone());
    drain(&request, &output);

    let shell = output.text();
    assert_eq!(
        shell,
        "A<!--$?--><template id=\"B:0\"></template>F<!--/$-->C"
    );
    assert!(!output.is_closed());

    content.resolve(text("B"));
    drain(&request, &output);

    assert!(output.is_closed());
    assert_eq!(request.status(), RequestStatus::Closed);
    let html = output.text();
    assert!(html[shell.len()..].starts_with("<div hidden id=\"S:0\">B<!-- --></div>"));
    assert!(html.ends_with("$RC(\"B:0\",\"S:0\")</script>"));
    assert_eq!(visible(&html), "ABC");
}

#[test]
fn content_ready_before_flowing_is_inlined() {
    let content = Deferred::new();
    let request = Request::new(letters(&content), RenderOptions::default(), Callbacks::new());
    let output = MemoryDestination::new();

    request.start_work();
    content.resolve(text("B"));
    request.start_flowing(output.clone());

    let html = output.text();
    assert_eq!(html, "A<!--$-->B<!-- --><!--/$-->C");
    assert!(!html.contains('F'));
    assert!(output.is_closed());
    assert_eq!(visible(&html), "ABC");
}

#[test]
fn synchronous_content_never_schedules_its_fallback() {
    let request = Request::new(
        element("section").child(suspense(
            component("Spinner", |_| panic!("fallback should not render")),
            element("p").child("ready"),
        )),
        RenderOptions::default(),
        Callbacks::new(),
    );
    let output = MemoryDestination::new();
    request.start_work();
    request.start_flowing(output.clone());

    let boundaries = request.boundary_stats();
    assert_eq!(boundaries.len(), 1);
    assert_eq!(boundaries[0].fallback_tasks_scheduled, 0);
    assert_eq!(boundaries[0].state, BoundaryState::Complete);
    assert_eq!(
        output.text(),
        "<section><!--$--><p>ready</p><!--/$--></section>"
    );
}

#[test]
fn shell_waits_for_root_level_suspensions() {
    let title = Deferred::new();
    let ready = std::rc::Rc::new(std::cell::Cell::new(false));
    let request = Request::new(
        element("h1").child(await_node(&title)),
        RenderOptions::default(),
        Callbacks::new().on_shell_ready({
            let ready = ready.clone();
            move || ready.set(true)
        }),
    );
    let output = MemoryDestination::new();
    request.start_work();
    request.start_flowing(output.clone());

    assert!(!request.is_shell_ready());
    assert_eq!(output.write_count(), 0);

    title.resolve(text("Inbox"));
    assert!(ready.get());
    assert_eq!(output.text(), "<h1>Inbox<!-- --></h1>");
    assert!(output.is_closed());
}

#[test]
fn suspending_twice_matches_the_resolved_tree() {
    fn sum(first: &Deferred<u32>, second: &Deferred<u32>) -> Node {
        let (first, second) = (first.clone(), second.clone());
        suspense(
            "…",
            component("Sum", move |scope| {
                let a = scope.wait(&first)?;
                let b = scope.wait(&second)?;
                Ok(text((a + b).to_string()))
            }),
        )
    }

    let (first, second) = (Deferred::new(), Deferred::new());
    let request = Request::new(sum(&first, &second), RenderOptions::default(), Callbacks::new());
    let output = MemoryDestination::new();
    request.start_work();
    request.start_flowing(output.clone());

    first.resolve(1);
    assert_eq!(request.stats().component_renders, 2);
    second.resolve(2);
    assert!(output.is_closed());
    assert!(request.stats().component_renders <= 3);

    let resolved = Request::new(
        sum(&Deferred::resolved(1), &Deferred::resolved(2)),
        RenderOptions::default(),
        Callbacks::new(),
    );
    let reference = MemoryDestination::new();
    resolved.start_work();
    resolved.start_flowing(reference.clone());
    assert_eq!(resolved.stats().component_renders, 1);

    assert_eq!(visible(&output.text()), visible(&reference.text()));
    assert_eq!(visible(&output.text()), "3");
}

#[test]
fn partial_boundaries_move_segments_as_they_complete() {
    fn page(first: &Deferred<Node>, second: &Deferred<Node>) -> Node {
        element("ul")
            .child(suspense(
                element("li").child("loading"),
                fragment([await_node(first), await_node(second)]),
            ))
            .into()
    }

    let (first, second) = (Deferred::new(), Deferred::new());
    let request = Request::new(page(&first, &second), RenderOptions::default(), Callbacks::new());
    let output = MemoryDestination::new();
    request.start_work();
    request.start_flowing(output.clone());

    assert!(output.text().contains("<div hidden id=\"S:0\">"));

    first.resolve(element("li").child("one").into());
    assert!(output.text().contains("$RS(\"S:1\",\"P:1\")"));
    assert!(!output.is_closed());

    second.resolve(element("li").child("two").into());
    assert!(output.is_closed());

    let expected = Request::new(
        page(
            &Deferred::resolved(element("li").child("one").into()),
            &Deferred::resolved(element("li").child("two").into()),
        ),
        RenderOptions::default(),
        Callbacks::new(),
    );
    let reference = MemoryDestination::new();
    expected.start_work();
    expected.start_flowing(reference.clone());

    assert_eq!(visible(&output.text()), visible(&reference.text()));
    assert_eq!(visible(&output.text()), "<ul><li>one</li><li>two</li></ul>");
}

#[test]
fn large_boundaries_are_streamed_out_of_order() {
    let request = Request::new(
        fragment([
            text("head "),
            suspense("…", element("article").child("a rather long body")),
        ]),
        RenderOptions::default().progressive_chunk_size(8),
        Callbacks::new(),
    );
    let output = MemoryDestination::new();
    request.start_work();
    request.start_flowing(output.clone());

    let html = output.text();
    assert!(html.starts_with("head <!--$?--><template id=\"B:0\"></template>"));
    assert!(html.contains("<div hidden id=\"S:0\"><article>a rather long body</article></div>"));
    assert!(html.ends_with("$RC(\"B:0\",\"S:0\")</script>"));
    assert!(output.is_closed());
    assert_eq!(
        visible(&html),
        "head <article>a rather long body</article>"
    );
}

#[test]
fn table_sections_use_a_table_container() {
    let cell = Deferred::new();
    let request = Request::new(
        element("table").child(
            element("tbody").child(suspense(
                element("tr").child(element("td").child("…")),
                await_node(&cell),
            )),
        ),
        RenderOptions::default(),
        Callbacks::new(),
    );
    let output = MemoryDestination::new();
    request.start_work();
    request.start_flowing(output.clone());

    cell.resolve(element("tr").child(element("td").child("42")).into());
    let html = output.text();
    assert!(html.contains("<table hidden><tbody id=\"S:0\"><tr><td>42</td></tr></tbody></table>"));
    assert!(output.is_closed());
}

#[test]
fn stream_yields_shell_then_the_rest() {
    block_on(async {
        let content = Deferred::new();
        let mut stream = render_to_stream(letters(&content), RenderOptions::default())
            .await
            .expect("shell should render");
        assert!(stream.request().is_shell_ready());

        content.resolve(text("B"));
        stream.all_ready().await.expect("render should finish");

        let mut html = Vec::new();
        while let Some(chunk) = stream.next().await {
            html.extend(chunk.expect("chunk should not be an error"));
        }
        let html = String::from_utf8(html).expect("output is utf-8");
        assert!(html.starts_with("A<!--$?-->"));
        assert_eq!(visible(&html), "ABC");
    });
}

#[test]
fn render_to_vec_collects_everything() {
    let html = block_on(render_to_vec(
        element("p").attr("class", "lede").child("hello & welcome"),
        RenderOptions::default(),
    ))
    .expect("render should succeed");
    assert_eq!(html, b"<p class=\"lede\">hello &amp; welcome</p>");
}

#[test]
fn stream_reports_shell_errors() {
    let result = block_on(render_to_stream(
        element("br").child("not allowed"),
        RenderOptions::default(),
    ));
    assert!(matches!(result, Err(RenderError::InvalidContent(_))));
}
