use axum::response::Html;

/// Single-page demo client for `/styles` and `/caption`.
pub async fn index() -> Html<&'static str> {
    Html(
        r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Styled Image Captioner</title>
    <style>
        * {
            margin: 0;
            padding: 0;
            box-sizing: border-box;
        }

        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, Cantarell, sans-serif;
            background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            padding: 20px;
        }

        .container {
            background: white;
            border-radius: 20px;
            box-shadow: 0 20px 60px rgba(0,0,0,0.3);
            max-width: 800px;
            width: 100%;
            padding: 40px;
        }

        h1 {
            color: #333;
            margin-bottom: 10px;
            font-size: 2em;
        }

        .subtitle {
            color: #666;
            margin-bottom: 20px;
            font-size: 0.9em;
        }

        .styles {
            display: flex;
            gap: 10px;
            margin-bottom: 20px;
            flex-wrap: wrap;
        }

        .style-option {
            flex: 1;
            min-width: 180px;
            border: 2px solid #e0e0e0;
            border-radius: 10px;
            padding: 12px;
            cursor: pointer;
        }

        .style-option.selected {
            border-color: #667eea;
            background: #f8f9ff;
        }

        .style-name {
            color: #667eea;
            font-weight: 600;
        }

        .style-description {
            color: #999;
            font-size: 0.85em;
        }

        .upload-area {
            border: 3px dashed #667eea;
            border-radius: 15px;
            padding: 60px 20px;
            text-align: center;
            cursor: pointer;
            background: #f8f9ff;
        }

        .upload-area.dragover {
            border-color: #764ba2;
            background: #e8ebff;
        }

        .upload-text {
            color: #667eea;
            font-size: 1.2em;
            font-weight: 600;
            margin-bottom: 10px;
        }

        .upload-hint {
            color: #999;
            font-size: 0.9em;
        }

        input[type="file"] {
            display: none;
        }

        .preview-container, .loading, .error {
            display: none;
            margin-top: 20px;
        }

        .preview-image {
            max-width: 100%;
            border-radius: 10px;
            margin-bottom: 20px;
        }

        .result {
            background: #f8f9ff;
            border-radius: 10px;
            padding: 20px;
        }

        .result-text {
            color: #333;
            font-size: 1.1em;
            line-height: 1.6;
        }

        .meta-info {
            display: flex;
            justify-content: space-between;
            margin-top: 15px;
            padding-top: 15px;
            border-top: 1px solid #e0e0e0;
            font-size: 0.85em;
            color: #666;
        }

        .error {
            background: #fee;
            border: 2px solid #fcc;
            color: #c33;
            padding: 15px;
            border-radius: 10px;
        }
    </style>
</head>
<body>
    <div class="container">
        <h1>Styled Image Captioner</h1>
        <p class="subtitle">Rust + Axum + Candle (CLIP &amp; GPT-2)</p>

        <div class="styles" id="styles"></div>

        <div class="upload-area" id="uploadArea">
            <div class="upload-text">Click or drag image here</div>
            <div class="upload-hint">JPG, PNG, WebP or BMP &bull; Max 10MB</div>
            <input type="file" id="fileInput" accept=".png,.jpg,.jpeg,.webp,.bmp">
        </div>

        <div class="loading" id="loading">Generating caption...</div>
        <div class="error" id="error"></div>

        <div class="preview-container" id="previewContainer">
            <img id="previewImage" class="preview-image" alt="Preview">
            <div class="result">
                <div class="result-text" id="captionText"></div>
                <div class="meta-info">
                    <span>Style: <strong id="styleUsed">--</strong></span>
                    <span>Confidence: <strong id="confidence">--</strong></span>
                    <span>Size: <strong id="imageInfo">--</strong></span>
                </div>
            </div>
        </div>
    </div>

    <script>
        const stylesDiv = document.getElementById('styles');
        const uploadArea = document.getElementById('uploadArea');
        const fileInput = document.getElementById('fileInput');
        const loading = document.getElementById('loading');
        const errorDiv = document.getElementById('error');
        const previewContainer = document.getElementById('previewContainer');
        const previewImage = document.getElementById('previewImage');
        let selectedStyle = 'creative';

        fetch('/styles')
            .then((response) => response.json())
            .then(({ styles }) => {
                for (const style of styles) {
                    const option = document.createElement('div');
                    option.className = 'style-option' + (style.id === selectedStyle ? ' selected' : '');
                    option.innerHTML = '<div class="style-name"></div><div class="style-description"></div>';
                    option.querySelector('.style-name').textContent = style.name;
                    option.querySelector('.style-description').textContent = style.description;
                    option.addEventListener('click', () => {
                        selectedStyle = style.id;
                        document.querySelectorAll('.style-option').forEach((el) => el.classList.remove('selected'));
                        option.classList.add('selected');
                    });
                    stylesDiv.appendChild(option);
                }
            });

        uploadArea.addEventListener('click', () => fileInput.click());
        uploadArea.addEventListener('dragover', (e) => {
            e.preventDefault();
            uploadArea.classList.add('dragover');
        });
        uploadArea.addEventListener('dragleave', () => uploadArea.classList.remove('dragover'));
        uploadArea.addEventListener('drop', (e) => {
            e.preventDefault();
            uploadArea.classList.remove('dragover');
            const file = e.dataTransfer.files[0];
            if (file) {
                handleFile(file);
            }
        });
        fileInput.addEventListener('change', (e) => {
            const file = e.target.files[0];
            if (file) {
                handleFile(file);
            }
        });

        async function handleFile(file) {
            previewImage.src = URL.createObjectURL(file);
            loading.style.display = 'block';
            errorDiv.style.display = 'none';
            previewContainer.style.display = 'none';

            const formData = new FormData();
            formData.append('file', file);
            formData.append('style', selectedStyle);

            try {
                const response = await fetch('/caption', { method: 'POST', body: formData });
                const result = await response.json();
                if (!response.ok) {
                    throw new Error(result.error || 'Upload failed');
                }

                document.getElementById('captionText').textContent = result.caption;
                document.getElementById('styleUsed').textContent = result.style;
                document.getElementById('confidence').textContent = (result.confidence * 100).toFixed(1) + '%';
                document.getElementById('imageInfo').textContent =
                    `${result.image_info.width}×${result.image_info.height} ${result.image_info.format}`;
                previewContainer.style.display = 'block';
            } catch (error) {
                errorDiv.textContent = 'Error: ' + error.message;
                errorDiv.style.display = 'block';
            } finally {
                loading.style.display = 'none';
            }
        }
    </script>
</body>
</html>
        "#,
    )
}
