//! The `window.IntelligenceService` shim injected into the caller's page.

/// Poster of a WebKit host that registered the `intelligenceHandler` script message handler
pub const WEBKIT_POSTER: &str = "window.webkit.messageHandlers.intelligenceHandler.postMessage";

const POSTER_PLACEHOLDER: &str = "__INTELLIGENCE_POST__";

const USER_SCRIPT: &str = r#"(function () {
    if (window.IntelligenceService) {
        return;
    }

    let sequence = 0;

    // Expose each callback as window["<channel>_<time>_<seq>"]; terminal ones remove all of them
    function register(channels) {
        const id = `${Date.now()}_${++sequence}`;
        const names = {};
        for (const channel of Object.keys(channels)) {
            names[channel] = `${channel}_${id}`;
        }
        const cleanup = function () {
            for (const channel of Object.keys(names)) {
                delete window[names[channel]];
            }
        };
        for (const channel of Object.keys(channels)) {
            const { callback, terminal } = channels[channel];
            window[names[channel]] = function (value) {
                if (terminal) {
                    cleanup();
                }
                if (typeof callback === "function") {
                    callback(value);
                }
            };
        }
        return names;
    }

    function post(message) {
        __INTELLIGENCE_POST__(message);
    }

    window.IntelligenceService = {
        loadModel: function (modelName, onStatus, onComplete, onError) {
            const names = register({
                onStatus: { callback: onStatus, terminal: false },
                onComplete: { callback: onComplete, terminal: true },
                onError: { callback: onError, terminal: true },
            });
            post({
                method: "loadModel",
                modelName: modelName,
                onStatus: names.onStatus,
                onComplete: names.onComplete,
                onError: names.onError,
            });
        },

        invokeModel: function (modelName, prompt, onComplete, onStream, onError) {
            const names = register({
                onComplete: { callback: onComplete, terminal: true },
                onStream: { callback: onStream, terminal: false },
                onError: { callback: onError, terminal: true },
            });
            post({
                method: "invokeModel",
                modelName: modelName,
                prompt: prompt,
                onComplete: names.onComplete,
                onStream: names.onStream,
                onError: names.onError,
            });
        },

        isModelDownloaded: function (modelName, onResult) {
            const names = register({
                onResult: { callback: onResult, terminal: true },
            });
            post({
                method: "isModelDownloaded",
                modelName: modelName,
                onResult: names.onResult,
            });
        },
    };
})();
"#;

/// Render the shim, posting messages with the JavaScript function expression `poster`.
pub fn user_script(poster: &str) -> String {
    USER_SCRIPT.replace(POSTER_PLACEHOLDER, poster)
}
