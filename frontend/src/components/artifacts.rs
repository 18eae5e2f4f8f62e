use leptos::prelude::*;

use crate::artifacts::{display_kind, file_name, is_code, is_previewable, language};
use crate::state::AppState;

/// Files produced by the current design thread.
#[component]
pub fn ArtifactPanel() -> impl IntoView {
    let state = expect_context::<AppState>();

    move || {
        let artifacts = state.artifacts.get();
        (!artifacts.is_empty()).then(|| {
            view! {
                <aside class="artifact-panel">
                    <h3>"Artifacts"</h3>
                    {artifacts.into_iter().map(|path| view! { <ArtifactCard path=path /> }).collect_view()}
                </aside>
            }
        })
    }
}

#[component]
pub fn ArtifactCard(path: String) -> impl IntoView {
    let badge = if is_previewable(&path) {
        "preview"
    } else if is_code(&path) {
        language(&path)
    } else {
        ""
    };
    view! {
        <div class="artifact-card" title=path.clone()>
            <span class="artifact-name">{file_name(&path).to_string()}</span>
            <span class="artifact-kind">{display_kind(&path)}</span>
            {(!badge.is_empty()).then(|| view! { <span class="artifact-badge">{badge}</span> })}
        </div>
    }
}
