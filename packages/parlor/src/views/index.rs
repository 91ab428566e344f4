use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use maud::{DOCTYPE, PreEscaped, html};

use super::{CHANNELS, CSS};
use crate::AppState;

pub async fn index_page(State(state): State<AppState>) -> impl IntoResponse {
    let default_channel = state.config.history.default_channel.as_str();

    let markup = html! {
        (DOCTYPE)
        html {
            head {
                title { "Parlor" }
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                script src="https://cdn.tailwindcss.com" {}
                style { (PreEscaped(CSS)) }
            }
            body class="bg-gray-900 text-gray-200 h-screen overflow-hidden" {
                div class="flex h-screen" {
                    // Sidebar
                    div class="w-60 bg-gray-800 border-r border-gray-700 flex flex-col flex-shrink-0" {
                        div class="p-4 border-b border-gray-700" {
                            h1 class="text-xl font-bold" { "Parlor" }
                            p class="text-sm text-gray-400 mt-1" {
                                "Signed in as " span id="username-display" {}
                            }
                        }

                        ul id="channel-list" class="flex-1 overflow-y-auto p-2 space-y-1" {
                            @for channel in CHANNELS {
                                li class=(if *channel == default_channel { "channel channel--active px-3 py-1 rounded" } else { "channel px-3 py-1 rounded" })
                                    data-channel=(channel) {
                                    "#" (channel)
                                }
                            }
                        }

                        // Voice controls
                        div class="p-4 border-t border-gray-700 space-y-2" {
                            div class="flex gap-2" {
                                button id="voice-join-btn" class="flex-1 px-3 py-1 rounded bg-green-700 hover:bg-green-600 text-sm" { "Join voice" }
                                button id="voice-leave-btn" class="flex-1 px-3 py-1 rounded bg-gray-700 hover:bg-gray-600 text-sm" disabled { "Leave" }
                            }
                            div id="voice-status" class="text-xs text-gray-400" { "Not in voice" }
                        }
                    }

                    // Conversation
                    div class="flex-1 flex flex-col min-w-0" {
                        div class="px-4 py-3 border-b border-gray-700 font-medium" id="current-channel-title" {
                            "#" (default_channel)
                        }
                        div id="messages" class="flex-1 overflow-y-auto px-4 py-2" {}
                        div class="p-4 border-t border-gray-700 flex gap-2" {
                            input id="message-input" type="text" autocomplete="off"
                                class="flex-1 px-3 py-2 rounded bg-gray-800 border border-gray-700"
                                placeholder="Say something";
                            button id="send-btn" class="px-4 py-2 rounded bg-blue-600 hover:bg-blue-500" { "Send" }
                        }
                    }
                }
                script src="/static/app.js" {}
            }
        }
    };

    Html(markup.into_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, http::StatusCode, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_index_page_has_client_hooks() {
        let state = crate::test_helpers::test_app_state().await;
        let app = Router::new().route("/", get(index_page)).with_state(state);

        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();

        assert!(html.starts_with("<!DOCTYPE html>"));
        for id in ["messages", "message-input", "channel-list", "voice-join-btn"] {
            assert!(html.contains(&format!("id=\"{}\"", id)), "missing #{}", id);
        }
        assert!(html.contains("data-channel=\"general\""));
        assert!(html.contains("/static/app.js"));
    }
}
