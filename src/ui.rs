use iocraft::prelude::*;
use tokio::sync::watch;

#[derive(Default, Props)]
pub struct MessageProps {
    pub message: String,
}

#[component]
pub fn SuccessMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Green, weight: Weight::Bold, content: "✓ ")
            Text(content: props.message.clone())
        }
    }
}

#[component]
pub fn ErrorMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Red, weight: Weight::Bold, content: "✗ ")
            Text(content: props.message.clone())
        }
    }
}

#[derive(Default, Props)]
pub struct FileInfoDetailsProps {
    pub entries: Vec<(String, String)>,
}

#[component]
pub fn FileInfoDetails(props: &FileInfoDetailsProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            #(props.entries.iter().map(|(key, value)| {
                element! {
                    View(flex_direction: FlexDirection::Row) {
                        View(width: 26) {
                            Text(weight: Weight::Bold, content: key.clone())
                        }
                        Text(content: value.clone())
                    }
                }
            }))
        }
    }
}

#[derive(Default, Props)]
pub struct ProgressBarProps {
    pub title: String,
    pub progress: Option<watch::Receiver<f32>>,
}

#[component]
pub fn ProgressBar(props: &ProgressBarProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut percent = hooks.use_state(|| 0.0f32);
    let progress = props.progress.clone();

    hooks.use_future(async move {
        let Some(mut progress) = progress else {
            return;
        };
        while progress.changed().await.is_ok() {
            percent.set(*progress.borrow_and_update());
        }
    });

    let percent = percent.get().clamp(0.0, 100.0);

    element! {
        View(flex_direction: FlexDirection::Column) {
            Text(content: props.title.clone())
            View(flex_direction: FlexDirection::Row) {
                View(border_style: BorderStyle::Round, border_color: Color::Blue, width: 60) {
                    View(width: Percent(percent), height: 1, background_color: Color::Green)
                }
                Text(content: format!(" {percent:.0}%"))
            }
        }
    }
}
